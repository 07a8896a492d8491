//! Frame-level reads and writes over split stream halves.

use asynchronous_codec::{Decoder, Encoder};
use bytes::BytesMut;
use chunknet_net_codec::{Frame, FrameCodec, FrameError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read the next frame, buffering partial input in `buf`.
///
/// Cancel safe: bytes read before cancellation stay in `buf`. End of stream
/// surfaces as [`std::io::ErrorKind::UnexpectedEof`].
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    codec: &mut FrameCodec,
) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        if let Some(frame) = codec.decode(buf)? {
            return Ok(frame);
        }
        if reader.read_buf(buf).await? == 0 {
            return Err(FrameError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
    }
}

/// Encode and flush one frame.
pub(crate) async fn write_frame<W>(
    writer: &mut W,
    codec: &mut FrameCodec,
    frame: Frame,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::with_capacity(frame.encoded_len());
    codec.encode(frame, &mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_frames_cross_a_pipe() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut codec = FrameCodec::default();

        let sent = Frame::new(9, Bytes::from(vec![7u8; 200]));
        let writer = tokio::spawn({
            let sent = sent.clone();
            async move {
                let mut codec = FrameCodec::default();
                write_frame(&mut client, &mut codec, sent).await.unwrap();
                client
            }
        });

        let mut buf = BytesMut::new();
        let received = read_frame(&mut server, &mut buf, &mut codec).await.unwrap();
        assert_eq!(received, sent);

        drop(writer.await.unwrap());
        assert_matches!(
            read_frame(&mut server, &mut buf, &mut codec).await,
            Err(FrameError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof
        );
    }
}
