//! Pairing code output.

/// Presents a freshly issued pairing code to the operator.
pub trait CodeRenderer: Send + Sync {
    /// Show `code`. Failures are logged, never returned.
    fn render(&self, code: &str);
}

/// Renderer that shows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRenderer;

impl CodeRenderer for NoopRenderer {
    fn render(&self, _code: &str) {}
}

#[cfg(feature = "terminal")]
pub use terminal::{RenderError, TerminalRenderer, render_half_blocks};

#[cfg(feature = "terminal")]
mod terminal {
    use std::io::Write;

    use qrcode::{Color, EcLevel, QrCode};
    use thiserror::Error;

    use super::CodeRenderer;

    /// Quiet zone around the code, in modules.
    const QUIET_ZONE: usize = 2;

    /// Terminal rendering error.
    #[derive(Debug, Error)]
    pub enum RenderError {
        #[error("failed to encode pairing code: {0}")]
        Encode(#[from] qrcode::types::QrError),
    }

    /// Prints pairing codes to stdout as QR codes.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct TerminalRenderer;

    impl CodeRenderer for TerminalRenderer {
        fn render(&self, code: &str) {
            let qr = match render_half_blocks(code) {
                Ok(qr) => qr,
                Err(e) => {
                    tracing::error!("Failed to render pairing code: {e}");
                    return;
                }
            };

            let mut stdout = std::io::stdout().lock();
            if let Err(e) = stdout.write_all(qr.as_bytes()).and_then(|()| stdout.flush()) {
                tracing::warn!("Failed to write pairing code: {e}");
            }
        }
    }

    /// Render `data` as a QR code using Unicode half blocks, two module
    /// rows per text line. Dark modules are drawn, light ones are spaces.
    ///
    /// # Errors
    /// Returns an error if `data` does not fit in a QR code.
    pub fn render_half_blocks(data: &str) -> Result<String, RenderError> {
        let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::L)?;
        let width = code.width();
        let modules = code.to_colors();
        let full_width = width + 2 * QUIET_ZONE;
        let is_dark = |row: usize, col: usize| {
            row >= QUIET_ZONE
                && col >= QUIET_ZONE
                && row < width + QUIET_ZONE
                && col < width + QUIET_ZONE
                && modules[(row - QUIET_ZONE) * width + (col - QUIET_ZONE)] == Color::Dark
        };

        let mut output = String::new();
        for row in (0..full_width).step_by(2) {
            for col in 0..full_width {
                let ch = match (is_dark(row, col), is_dark(row + 1, col)) {
                    (true, true) => '\u{2588}',
                    (true, false) => '\u{2580}',
                    (false, true) => '\u{2584}',
                    (false, false) => ' ',
                };
                output.push(ch);
            }
            output.push('\n');
        }

        Ok(output)
    }

}
