//! # File-Transfer Sub-Protocol
//!
//! Minimal blocking client for the service's secondary file-transfer
//! channel, used by the lockdown revision check to fetch its challenge
//! archive. One request, one download, connection closed.
//!
//! Request (little-endian, after the `0x02` selector byte):
//! `{ header_len: u16, version: u16, platform: dword, product: dword,
//!   banner_id: u32, banner_ext: u32, start_offset: u32, filetime: i64,
//!   filename: cstring }`
//!
//! Response: `{ header_len: u16, file_size: u32, filetime: i64,
//!   filename: cstring }` followed by `file_size` bytes of file data.

use std::io::{Read, Write};

use bytes::{BufMut, BytesMut};
use tracing::{debug, info};

use crate::config::{ClientConfig, TransportConfig};
use crate::core::cursor::{BinaryCursor, Encoding};
use crate::error::{constants, ProtocolError, Result};
use crate::transport::{selector, tcp};

/// Protocol version tag carried in the request header.
const TRANSFER_VERSION: u16 = 0x0100;

/// Hard cap on an accepted download; the lockdown archives are tiny.
const MAX_DOWNLOAD: u32 = 4 * 1024 * 1024;

fn build_request(client: &ClientConfig, filename: &str, filetime: i64) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(32 + filename.len());
    buf.put_u16_le(0); // patched below
    buf.put_u16_le(TRANSFER_VERSION);

    let mut platform = [0u8; 4];
    platform.copy_from_slice(&client.platform.as_bytes()[..4]);
    platform.reverse();
    buf.put_slice(&platform);

    let mut product = [0u8; 4];
    product.copy_from_slice(&client.product.as_bytes()[..4]);
    product.reverse();
    buf.put_slice(&product);

    buf.put_u32_le(0); // banner id
    buf.put_u32_le(0); // banner extension
    buf.put_u32_le(0); // start offset: full file
    buf.put_i64_le(filetime);
    buf.put_slice(filename.as_bytes());
    buf.put_u8(0);

    let len = buf.len();
    if len > u16::MAX as usize {
        return Err(ProtocolError::OversizedPayload(len));
    }
    buf[0..2].copy_from_slice(&(len as u16).to_le_bytes());
    Ok(buf.to_vec())
}

/// Download one file from the transfer service.
///
/// Opens its own connection (the chat connection stays untouched), applies
/// the configured response timeout to every read, and returns the file
/// bytes.
pub fn download(
    transport: &TransportConfig,
    client: &ClientConfig,
    filename: &str,
    filetime: i64,
) -> Result<Vec<u8>> {
    if client.platform.len() != 4 || client.product.len() != 4 {
        return Err(ProtocolError::ConfigError(
            "platform and product tags must be 4 characters".into(),
        ));
    }

    let mut stream = tcp::connect_raw(transport, selector::FILE_TRANSFER)?;
    stream.set_read_timeout(Some(transport.response_timeout))?;

    let request = build_request(client, filename, filetime)?;
    stream.write_all(&request)?;
    debug!(filename, "File-transfer request sent");

    // Response header: length-prefixed, then parsed as one unit.
    let mut len_bytes = [0u8; 2];
    stream.read_exact(&mut len_bytes)?;
    let header_len = u16::from_le_bytes(len_bytes) as usize;
    if header_len < 2 {
        return Err(ProtocolError::FileTransfer(
            constants::ERR_TRANSFER_HEADER.into(),
        ));
    }

    let mut header = vec![0u8; header_len - 2];
    stream.read_exact(&mut header)?;

    let mut cursor = BinaryCursor::new(&header);
    let file_size = cursor.read_u32().map_err(|_| {
        ProtocolError::FileTransfer(constants::ERR_TRANSFER_HEADER.into())
    })?;
    let _filetime = cursor.read_i64().map_err(|_| {
        ProtocolError::FileTransfer(constants::ERR_TRANSFER_HEADER.into())
    })?;
    let name = cursor
        .read_cstring(Encoding::Ascii)
        .map_err(|_| ProtocolError::FileTransfer(constants::ERR_TRANSFER_HEADER.into()))?;

    if file_size > MAX_DOWNLOAD {
        return Err(ProtocolError::FileTransfer(format!(
            "server offered {file_size} bytes, cap is {MAX_DOWNLOAD}"
        )));
    }

    let mut data = vec![0u8; file_size as usize];
    stream.read_exact(&mut data)?;
    info!(filename = %name, bytes = file_size, "File downloaded");
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn request_layout_is_parseable() {
        let client = ClientConfig {
            product: "W2BN".into(),
            platform: "IX86".into(),
            ..Default::default()
        };
        let request = build_request(&client, "lockdown-IX86-07.mpq", 0x0102_0304).unwrap();

        let declared = u16::from_le_bytes([request[0], request[1]]) as usize;
        assert_eq!(declared, request.len());

        let mut cursor = BinaryCursor::new(&request[2..]);
        assert_eq!(cursor.read_u16().unwrap(), TRANSFER_VERSION);
        assert_eq!(cursor.read_dword_string(true).unwrap(), "IX86");
        assert_eq!(cursor.read_dword_string(true).unwrap(), "W2BN");
        cursor.seek(12).unwrap();
        assert_eq!(cursor.read_i64().unwrap(), 0x0102_0304);
        assert_eq!(
            cursor.read_cstring(Encoding::Ascii).unwrap(),
            "lockdown-IX86-07.mpq"
        );
    }

    #[test]
    fn downloads_a_scripted_file() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            let mut selector_byte = [0u8; 1];
            peer.read_exact(&mut selector_byte).unwrap();
            assert_eq!(selector_byte[0], selector::FILE_TRANSFER);

            // Consume the request: length prefix, then the rest.
            let mut len_bytes = [0u8; 2];
            peer.read_exact(&mut len_bytes).unwrap();
            let mut rest = vec![0u8; u16::from_le_bytes(len_bytes) as usize - 2];
            peer.read_exact(&mut rest).unwrap();

            let payload = b"archive-bytes";
            let name = b"lockdown-IX86-07.mpq\0";
            let header_len = 2 + 4 + 8 + name.len();
            let mut response = Vec::new();
            response.extend_from_slice(&(header_len as u16).to_le_bytes());
            response.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            response.extend_from_slice(&0i64.to_le_bytes());
            response.extend_from_slice(name);
            response.extend_from_slice(payload);
            peer.write_all(&response).unwrap();
        });

        let transport = TransportConfig {
            address: addr.to_string(),
            response_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let client = ClientConfig::default();

        let data = download(&transport, &client, "lockdown-IX86-07.mpq", 0).unwrap();
        assert_eq!(data, b"archive-bytes");
        server.join().unwrap();
    }
}
