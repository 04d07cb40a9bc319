//! Positional reads over a document that is never held in memory as a whole.

use async_trait::async_trait;

use crate::error::TransportError;

/// Random access into a document of known length.
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`. Returns 0 at or past the end.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Document length in bytes.
    fn size(&self) -> u64;

    /// Fill `buf` completely, issuing as many reads as needed.
    async fn read_exact_at(&self, mut offset: u64, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset, &mut buf[filled..]).await?;
            if n == 0 {
                return Err(TransportError::ShortBody {
                    expected: buf.len(),
                    got: filled,
                });
            }
            filled += n;
            offset += n as u64;
        }
        Ok(())
    }
}
