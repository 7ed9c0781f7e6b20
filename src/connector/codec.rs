// ABOUTME: Frame codec for the multiplexed connector stream
//
// Every frame starts with a big-endian i32 target interface id. A target of
// -1 is a keepalive ping and carries nothing else. Otherwise the frame is
// followed by length-prefixed UTF-8 strings:
//
//   request  (client -> server): [i32 target][str request_type][str json]
//   response (server -> client): [i32 target][str json]
//
// A string is a big-endian i32 byte length followed by the bytes.

use std::io::{self, ErrorKind};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Target id reserved for keepalive pings
pub const PING_TARGET: i32 = -1;

/// Frame sent by the client to address one interface on the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub target: i32,
    pub request_type: String,
    pub payload: String,
}

/// Frame sent by the server back to one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub target: i32,
    pub payload: String,
}

/// One decoded unit from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<T> {
    /// Keepalive marker, never routed
    Ping,
    /// Frame addressed to an interface
    Data(T),
}

/// Write a keepalive ping
pub async fn encode_ping<W>(w: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    w.write_i32(PING_TARGET).await?;
    w.flush().await
}

/// Write a request frame
pub async fn encode_request<W>(w: &mut W, frame: &RequestFrame) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(12 + frame.request_type.len() + frame.payload.len());
    buf.extend_from_slice(&data_target(frame.target)?.to_be_bytes());
    put_string(&mut buf, &frame.request_type)?;
    put_string(&mut buf, &frame.payload)?;
    w.write_all(&buf).await?;
    w.flush().await
}

/// Write a response frame
pub async fn encode_response<W>(w: &mut W, frame: &ResponseFrame) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(8 + frame.payload.len());
    buf.extend_from_slice(&data_target(frame.target)?.to_be_bytes());
    put_string(&mut buf, &frame.payload)?;
    w.write_all(&buf).await?;
    w.flush().await
}

/// Read one server -> client frame
pub async fn decode_response<R>(r: &mut R, max_len: usize) -> io::Result<Frame<ResponseFrame>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let target = r.read_i32().await?;
    if target == PING_TARGET {
        return Ok(Frame::Ping);
    }
    let payload = read_string(r, max_len).await?;
    Ok(Frame::Data(ResponseFrame { target, payload }))
}

/// Read one client -> server frame
pub async fn decode_request<R>(r: &mut R, max_len: usize) -> io::Result<Frame<RequestFrame>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let target = r.read_i32().await?;
    if target == PING_TARGET {
        return Ok(Frame::Ping);
    }
    let request_type = read_string(r, max_len).await?;
    let payload = read_string(r, max_len).await?;
    Ok(Frame::Data(RequestFrame {
        target,
        request_type,
        payload,
    }))
}

/// Data frames may not claim the ping marker
fn data_target(target: i32) -> io::Result<i32> {
    if target == PING_TARGET {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "target -1 is reserved for pings",
        ));
    }
    Ok(target)
}

fn put_string(buf: &mut Vec<u8>, value: &str) -> io::Result<()> {
    let len = i32::try_from(value.len())
        .map_err(|_| io::Error::new(ErrorKind::InvalidData, "string exceeds i32::MAX bytes"))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

async fn read_string<R>(r: &mut R, max_len: usize) -> io::Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = r.read_i32().await?;
    let len = usize::try_from(len)
        .map_err(|_| io::Error::new(ErrorKind::InvalidData, format!("negative string length {len}")))?;
    if len > max_len {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("string of {len} bytes exceeds {max_len} byte limit"),
        ));
    }
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes).await?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    const LIMIT: usize = 1024;

    #[tokio::test]
    async fn test_ping_is_four_bytes() {
        let mut buf = Vec::new();
        encode_ping(&mut buf).await.unwrap();
        assert_eq!(buf, vec![0xff, 0xff, 0xff, 0xff]);

        let decoded = decode_response(&mut Cursor::new(buf), LIMIT).await.unwrap();
        assert_eq!(decoded, Frame::Ping);
    }

    #[tokio::test]
    async fn test_request_layout() {
        let frame = RequestFrame {
            target: 3,
            request_type: "Ping".to_string(),
            payload: "{}".to_string(),
        };
        let mut buf = Vec::new();
        encode_request(&mut buf, &frame).await.unwrap();

        let expected: Vec<u8> = [
            &[0, 0, 0, 3][..],
            &[0, 0, 0, 4],
            b"Ping",
            &[0, 0, 0, 2],
            b"{}",
        ]
        .concat();
        assert_eq!(buf, expected);

        let decoded = decode_request(&mut Cursor::new(buf), LIMIT).await.unwrap();
        assert_eq!(decoded, Frame::Data(frame));
    }

    #[tokio::test]
    async fn test_response_utf8_length_is_bytes() {
        let frame = ResponseFrame {
            target: 0,
            payload: "{\"msg\":\"héllo\"}".to_string(),
        };
        let mut buf = Vec::new();
        encode_response(&mut buf, &frame).await.unwrap();
        assert_eq!(&buf[4..8], &16i32.to_be_bytes());

        let decoded = decode_response(&mut Cursor::new(buf), LIMIT).await.unwrap();
        assert_eq!(decoded, Frame::Data(frame));
    }

    #[tokio::test]
    async fn test_ping_target_rejected_for_data() {
        let frame = ResponseFrame {
            target: PING_TARGET,
            payload: "{}".to_string(),
        };
        let err = encode_response(&mut Vec::new(), &frame).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_oversized_string_rejected() {
        let mut buf = 1i32.to_be_bytes().to_vec();
        buf.extend_from_slice(&(LIMIT as i32 + 1).to_be_bytes());
        let err = decode_response(&mut Cursor::new(buf), LIMIT).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_negative_length_rejected() {
        let mut buf = 1i32.to_be_bytes().to_vec();
        buf.extend_from_slice(&(-5i32).to_be_bytes());
        let err = decode_response(&mut Cursor::new(buf), LIMIT).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_eof() {
        let mut buf = 1i32.to_be_bytes().to_vec();
        buf.extend_from_slice(&10i32.to_be_bytes());
        buf.extend_from_slice(b"abc");
        let err = decode_response(&mut Cursor::new(buf), LIMIT).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_invalid_utf8_rejected() {
        let mut buf = 1i32.to_be_bytes().to_vec();
        buf.extend_from_slice(&2i32.to_be_bytes());
        buf.extend_from_slice(&[0xc3, 0x28]);
        let err = decode_response(&mut Cursor::new(buf), LIMIT).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
