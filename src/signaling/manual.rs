//! Fully offline/manual signaling: the host prints a compact offer (plus a
//! QR code) and the operator types the controller's compact answer back in.
//!
//! Grounded on `tui/qr.rs`'s `qrcodegen`-based rendering, paired with the
//! offline compact SDP codec (`protocol::sdp::encode_offer`/`decode_answer`).

use std::io::{self, Write};

use anyhow::{Context, Result};
use qrcodegen::{QrCode, QrCodeEcc};

use crate::protocol::sdp;

/// Renders `text` as a QR code using half-block characters, one line per
/// pair of module rows — the same rendering technique `tui/qr.rs` uses for
/// terminal display.
pub fn render_qr(text: &str) -> Result<String> {
    let qr = QrCode::encode_text(text, QrCodeEcc::Low)
        .map_err(|e| anyhow::anyhow!("failed to encode QR code: {e}"))?;
    let size = qr.size();
    let mut out = String::new();
    let mut y = 0;
    while y < size {
        for x in 0..size {
            let top = qr.get_module(x, y);
            let bottom = y + 1 < size && qr.get_module(x, y + 1);
            let ch = match (top, bottom) {
                (true, true) => ' ',
                (true, false) => '▄',
                (false, true) => '▀',
                (false, false) => '█',
            };
            out.push(ch);
        }
        out.push('\n');
        y += 2;
    }
    Ok(out)
}

/// Prints the host's compact offer descriptor (plus QR) to stdout, and
/// blocks on stdin for the operator to paste back the controller's answer.
pub fn exchange_offer_for_answer(sdp_text: &str, salt: &[u8; 16]) -> Result<String> {
    let encoded = sdp::encode_offer(sdp_text, salt).context("failed to encode compact offer")?;

    println!("Share this code with the controller:\n");
    println!("{encoded}\n");
    if let Ok(qr) = render_qr(&encoded) {
        println!("{qr}");
    }
    print!("Paste the controller's answer code: ");
    io::stdout().flush().ok();

    let mut answer_line = String::new();
    io::stdin()
        .read_line(&mut answer_line)
        .context("failed to read answer from stdin")?;

    sdp::decode_answer(answer_line.trim()).context("failed to decode answer code")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_qr_produces_nonempty_grid() {
        let rendered = render_qr("hello world").unwrap();
        assert!(!rendered.is_empty());
        assert!(rendered.contains('\n'));
    }
}
