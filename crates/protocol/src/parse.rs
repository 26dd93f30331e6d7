use bytes::Bytes;
use tidekv_common::CommandError;

use crate::Frame;

/// Cursor sobre um Frame::Array para extrair argumentos sequencialmente.
///
/// Esgotar os argumentos produz `CommandError::MissingArguments`; o layer de
/// comandos converte isso (e `TrailingArguments`) em `WrongArity` com o nome
/// do comando.
pub struct Parse {
    parts: Vec<Frame>,
    pos: usize,
}

impl Parse {
    /// Cria um Parse a partir de um Frame. O frame deve ser Array.
    pub fn new(frame: Frame) -> Result<Parse, CommandError> {
        match frame {
            Frame::Array(parts) => Ok(Parse { parts, pos: 0 }),
            _ => Err(CommandError::InvalidArgument(
                "expected an array of bulk strings".into(),
            )),
        }
    }

    /// Retorna o próximo elemento como String (de Bulk ou Simple).
    pub fn next_string(&mut self) -> Result<String, CommandError> {
        match self.next()? {
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(data) => String::from_utf8(data.to_vec())
                .map_err(|_| CommandError::InvalidArgument("invalid UTF-8 string".into())),
            _ => Err(CommandError::InvalidArgument(
                "expected a string argument".into(),
            )),
        }
    }

    /// Retorna o próximo elemento como Bytes (de Bulk).
    pub fn next_bytes(&mut self) -> Result<Bytes, CommandError> {
        match self.next()? {
            Frame::Bulk(data) => Ok(data),
            Frame::Simple(s) => Ok(Bytes::from(s)),
            _ => Err(CommandError::InvalidArgument(
                "expected a bulk argument".into(),
            )),
        }
    }

    /// Retorna o próximo elemento como i64.
    pub fn next_int(&mut self) -> Result<i64, CommandError> {
        let s = self.next_string()?;
        s.parse::<i64>()
            .map_err(|_| CommandError::InvalidArgument(format!("'{s}' is not an integer")))
    }

    /// Retorna o próximo elemento como f64 (timeout do BLPOP aceita fração).
    pub fn next_float(&mut self) -> Result<f64, CommandError> {
        let s = self.next_string()?;
        s.parse::<f64>()
            .map_err(|_| CommandError::InvalidArgument(format!("'{s}' is not a number")))
    }

    /// Verifica se todos os argumentos foram consumidos.
    pub fn finish(&self) -> Result<(), CommandError> {
        if self.pos < self.parts.len() {
            Err(CommandError::TrailingArguments)
        } else {
            Ok(())
        }
    }

    /// Verifica se ainda há argumentos restantes.
    pub fn has_remaining(&self) -> bool {
        self.pos < self.parts.len()
    }

    fn next(&mut self) -> Result<Frame, CommandError> {
        if self.pos >= self.parts.len() {
            return Err(CommandError::MissingArguments);
        }
        let frame = self.parts[self.pos].clone();
        self.pos += 1;
        Ok(frame)
    }
}
