//! Internal helper macros.

/// Returns early with `$error` when `$predicate` does not hold.
///
/// ```ignore
/// ensure!(header_count <= MAX_HEADER_NUM, ParseError::too_many_headers(MAX_HEADER_NUM));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// `io::Write` over a `BytesMut`, for `write!` formatting straight into an encode buffer.
pub(crate) struct FastWrite<'a>(pub(crate) &'a mut bytes::BytesMut);

impl std::io::Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        bytes::BufMut::put_slice(self.0, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
