use crate::binary;
use crate::crypto;
use std::io;

use aes::Aes256;
use chacha20::ChaCha20;
use cipher::KeyIvInit;
use derive_more::From;

use super::{CbcReader, CbcWriter, HMacReader, HmacWriter, StreamCipherReader, StreamCipherWriter};

const CHACHA20_NONCE_LEN: usize = 12;

/// Writer stage that can seal its stream and hand back the wrapped sink.
pub(crate) trait PayloadCipherWrite<'a, W>: io::Write
where
    W: io::Write + 'a,
{
    fn finish(&mut self) -> io::Result<W>;
}

fn unsupported_cipher(cipher: binary::Cipher) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("Unsupported cipher setting {:?}", cipher),
    )
}

fn chacha20_cipher(key: &crypto::CipherKey, iv: &[u8]) -> io::Result<ChaCha20> {
    if iv.len() < CHACHA20_NONCE_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Encryption IV too short for ChaCha20",
        ));
    }
    ChaCha20::new_from_slices(&key.0, &iv[0..CHACHA20_NONCE_LEN]).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "Invalid cipher params - could not create ChaCha20 stream",
        )
    })
}

/// Build the read side of the payload pipeline:
/// HMAC block verification, decryption, then optional gzip decompression.
pub(crate) fn payload_read_stream<'a, R: io::Read + 'a>(
    inner: R,
    hmac_key: crypto::HmacKey,
    cipher_key: crypto::CipherKey,
    cipher: binary::Cipher,
    iv: &[u8],
    compression: binary::CompressionType,
) -> io::Result<Box<dyn io::Read + 'a>> {
    let buffered = io::BufReader::new(inner);
    let verified = HMacReader::new(buffered, hmac_key);
    let decrypted: Box<dyn io::Read + 'a> = match cipher {
        binary::Cipher::Aes256 => Box::new(
            CbcReader::<Aes256, _>::wrap(verified, &cipher_key, iv).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Invalid cipher params - could not create CBC block mode",
                )
            })?,
        ),
        binary::Cipher::ChaCha20 => Box::new(StreamCipherReader::new(
            verified,
            chacha20_cipher(&cipher_key, iv)?,
        )),
        other => return Err(unsupported_cipher(other)),
    };
    let decompressed: Box<dyn io::Read + 'a> = match compression {
        binary::CompressionType::None => decrypted,
        binary::CompressionType::Gzip => Box::new(libflate::gzip::Decoder::new(decrypted)?),
        binary::CompressionType::Unknown(_) => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Unsupported compression type {:?}", compression),
            ))
        }
    };

    Ok(decompressed)
}

enum PayloadWriteInner<'a, W>
where
    W: 'a + io::Write,
{
    Raw(Box<dyn PayloadCipherWrite<'a, HmacWriter<'a, W>> + 'a>),
    Gzip(libflate::gzip::Encoder<Box<dyn PayloadCipherWrite<'a, HmacWriter<'a, W>> + 'a>>),
}

#[derive(From)]
pub(crate) struct PayloadWriter<'a, W: 'a + io::Write>(PayloadWriteInner<'a, W>);

impl<'a, W> PayloadWriter<'a, W>
where
    W: 'a + io::Write,
{
    pub(crate) fn finish(self) -> io::Result<W> {
        let mut encryption = match self.0 {
            PayloadWriteInner::Raw(inner) => Ok(inner),
            PayloadWriteInner::Gzip(gz) => gz.finish().into_result(),
        }?;
        let hmacw = encryption.finish()?;
        let mut inner = hmacw.finish()?;
        inner.flush()?;
        Ok(inner)
    }
}

impl<'a, W> io::Write for PayloadWriter<'a, W>
where
    W: 'a + io::Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0 {
            PayloadWriteInner::Raw(ref mut inner) => inner.write(buf),
            PayloadWriteInner::Gzip(ref mut inner) => inner.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self.0 {
            PayloadWriteInner::Raw(ref mut inner) => inner.flush(),
            PayloadWriteInner::Gzip(ref mut inner) => inner.flush(),
        }
    }
}

/// Build the write side of the payload pipeline:
/// optional gzip compression, encryption, then HMAC block framing.
pub(crate) fn payload_write_stream<'a, W: 'a + io::Write>(
    inner: W,
    hmac_key: crypto::HmacKey,
    cipher_key: crypto::CipherKey,
    cipher: binary::Cipher,
    iv: &[u8],
    compression: binary::CompressionType,
) -> io::Result<PayloadWriter<'a, W>> {
    let verified = HmacWriter::new(inner, hmac_key);
    let encrypted: Box<dyn PayloadCipherWrite<HmacWriter<'a, W>> + 'a> = match cipher {
        binary::Cipher::Aes256 => Box::new(
            CbcWriter::<Aes256, _>::wrap(verified, &cipher_key, iv).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Invalid cipher params - could not create CBC block mode",
                )
            })?,
        ),
        binary::Cipher::ChaCha20 => Box::new(StreamCipherWriter::new(
            verified,
            chacha20_cipher(&cipher_key, iv)?,
        )),
        other => return Err(unsupported_cipher(other)),
    };
    Ok(match compression {
        binary::CompressionType::None => PayloadWriteInner::Raw(encrypted).into(),
        binary::CompressionType::Gzip => {
            PayloadWriteInner::Gzip(libflate::gzip::Encoder::new(encrypted)?).into()
        }
        binary::CompressionType::Unknown(_) => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Unsupported compression type {:?}", compression),
            ))
        }
    })
}
