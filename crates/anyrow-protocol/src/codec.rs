use crate::messages::RowSet;
use anyhow::{anyhow, bail, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Leading byte of a row-set frame.
pub const ROW_SET_TAG: u8 = b'R';

/// Upper bound for a single frame payload.
pub const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

/// Frame layout: tag, big-endian i32 length (including itself), bincode payload.
pub fn encode_row_set(set: &RowSet) -> Result<Bytes> {
    let payload = bincode::serialize(set)?;
    if payload.len() > MAX_FRAME_BYTES {
        bail!("row set of {} bytes exceeds frame limit", payload.len());
    }
    let mut buf = BytesMut::with_capacity(payload.len() + 5);
    buf.put_u8(ROW_SET_TAG);
    buf.put_i32((payload.len() + 4) as i32);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

pub fn decode_row_set(mut frame: &[u8]) -> Result<RowSet> {
    if frame.remaining() < 5 {
        bail!("truncated row set frame");
    }
    let tag = frame.get_u8();
    if tag != ROW_SET_TAG {
        bail!("unexpected frame tag {tag:#04x}");
    }
    let len = payload_len(frame.get_i32())?;
    if frame.remaining() < len {
        bail!("row set frame declares {len} bytes, {} available", frame.remaining());
    }
    let set = bincode::deserialize(&frame[..len])?;
    Ok(set)
}

pub async fn write_row_set<S: AsyncWrite + Unpin>(stream: &mut S, set: &RowSet) -> Result<()> {
    let frame = encode_row_set(set)?;
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

pub async fn read_row_set<S: AsyncRead + Unpin>(stream: &mut S) -> Result<RowSet> {
    let tag = stream.read_u8().await?;
    if tag != ROW_SET_TAG {
        bail!("unexpected frame tag {tag:#04x}");
    }
    let len = payload_len(stream.read_i32().await?)?;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    let set = bincode::deserialize(&buf)?;
    Ok(set)
}

fn payload_len(declared: i32) -> Result<usize> {
    let len = usize::try_from(declared)
        .ok()
        .and_then(|n| n.checked_sub(4))
        .ok_or_else(|| anyhow!("invalid frame length {declared}"))?;
    if len > MAX_FRAME_BYTES {
        bail!("frame length {len} exceeds limit");
    }
    Ok(len)
}
