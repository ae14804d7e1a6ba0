use liblzma::write::XzEncoder;
use std::io::{Error, Write};

/// Finalizes a layered writer and hands back the writer underneath, so the
/// archive pipeline can be unwound stage by stage.
pub trait Finish<O> {
    fn finish(self) -> Result<O, Error>;
}

impl<W: Write> Finish<W> for XzEncoder<W> {
    fn finish(self) -> Result<W, Error> {
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_xz_encoder_finish_returns_inner_writer() {
        let encoder = XzEncoder::new(Cursor::new(Vec::new()), 1);
        let cursor = encoder.finish().unwrap();
        // A finished empty stream still carries the xz container bytes.
        assert!(!cursor.get_ref().is_empty());
    }
}
