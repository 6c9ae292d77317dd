//! Streaming copy with SHA-1, size limit and Content-Length verification
//!
//! One pass over the source: every chunk is hashed, written and counted before
//! the next read, so payloads are never buffered whole.

use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::context::Context;
use crate::error::{IntegrityError, TransferError};

const CHUNK_SIZE: usize = 32 * 1024;

/// Bounds enforced by [`copy_with_integrity`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyLimits {
    /// Abort once more than this many bytes have been copied (None = unlimited)
    pub max_size: Option<u64>,
    /// Declared length of the source, typically from Content-Length
    pub expected_size: Option<u64>,
}

impl CopyLimits {
    /// `max_size` of 0 means unlimited
    pub fn new(max_size: u64, expected_size: Option<u64>) -> Self {
        Self {
            max_size: (max_size > 0).then_some(max_size),
            expected_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySummary {
    pub bytes: u64,
    /// Lowercase hex SHA-1 of everything written
    pub sha1: String,
}

/// Copy `reader` into `writer` under `ctx`.
///
/// Fails on a short write, on exceeding `max_size`, and when the source ends
/// before `expected_size`. A source longer than `expected_size` is only logged.
pub async fn copy_with_integrity<R, W>(
    ctx: &Context,
    reader: &mut R,
    writer: &mut W,
    limits: CopyLimits,
) -> Result<CopySummary, TransferError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = match ctx.run(reader.read(&mut buf)).await? {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(match limits.expected_size {
                    Some(expected) if total < expected => {
                        IntegrityError::Truncated { expected, actual: total }
                    }
                    _ => IntegrityError::UnexpectedEof { offset: total },
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        let chunk = &buf[..n];
        hasher.update(chunk);

        let written = ctx.run(writer.write(chunk)).await??;
        if written != n {
            return Err(IntegrityError::PartialWrite { expected: n, written }.into());
        }
        total += n as u64;

        if let Some(max) = limits.max_size {
            if total > max {
                return Err(IntegrityError::SizeExceeded { offset: total, max }.into());
            }
        }
    }

    ctx.run(writer.flush()).await??;

    if let Some(expected) = limits.expected_size {
        if total < expected {
            return Err(IntegrityError::Truncated { expected, actual: total }.into());
        }
        if total > expected {
            warn!(
                "Received {} bytes but Content-Length declared {}; server misreports length",
                total, expected
            );
        }
    }

    Ok(CopySummary {
        bytes: total,
        sha1: hex::encode(hasher.finalize()),
    })
}
