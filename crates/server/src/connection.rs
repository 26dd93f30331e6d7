use bytes::BytesMut;
use std::io::Cursor;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use tidekv_common::{ConnectionError, INITIAL_BUFFER_CAPACITY, ProtocolError};
use tidekv_protocol::Frame;

/// Wrapper sobre TcpStream com buffer retido para leitura/escrita de frames
/// RESP.
///
/// O buffer acumula bytes entre reads: um frame parcial fica retido até o
/// próximo chunk, e vários frames chegados de uma vez são todos decodados
/// antes de esperar mais bytes.
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Lê um frame completo do stream. Retorna None no EOF limpo.
    ///
    /// EOF com um frame parcial no buffer é erro de protocolo (o stream
    /// terminou antes dos bytes prometidos).
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            if self.fill_buffer().await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ConnectionError::ConnectionReset);
            }
        }
    }

    /// Lê mais bytes do socket para o buffer retido, sem decodar. Retorna o
    /// número de bytes lidos (0 = EOF). Usado pelo BLPOP para observar a
    /// desconexão do peer enquanto suspenso; bytes que chegarem ficam no
    /// buffer como comandos pipelined.
    pub async fn fill_buffer(&mut self) -> Result<usize, ConnectionError> {
        Ok(self.stream.read_buf(&mut self.buffer).await?)
    }

    /// Escreve um frame no stream.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    fn parse_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        let mut cursor = Cursor::new(&self.buffer[..]);

        match Frame::check(&mut cursor) {
            Ok(()) => {
                let len = cursor.position() as usize;
                cursor.set_position(0);
                let frame = Frame::parse(&mut cursor).map_err(invalid_data)?;
                self.buffer = self.buffer.split_off(len);
                Ok(Some(frame))
            }
            Err(ProtocolError::Incomplete) => Ok(None),
            // frame malformado é fatal: a conexão fecha sem resposta
            Err(e) => Err(invalid_data(e)),
        }
    }
}

fn invalid_data(e: ProtocolError) -> ConnectionError {
    ConnectionError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        e.to_string(),
    ))
}
