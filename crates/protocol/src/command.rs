use std::time::Duration;

use bytes::Bytes;
use tidekv_common::CommandError;

use crate::{Frame, Parse};

/// Expiração opcional do SET (EX em segundos, PX em milissegundos).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Seconds(u64),
    Millis(u64),
}

impl Expiry {
    pub fn as_duration(&self) -> Duration {
        match *self {
            Expiry::Seconds(s) => Duration::from_secs(s),
            Expiry::Millis(ms) => Duration::from_millis(ms),
        }
    }
}

/// Enum com todos os comandos suportados.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping,
    Echo(Bytes),
    Type(String),
    Get(String),
    Set {
        key: String,
        value: Bytes,
        expire: Option<Expiry>,
    },
    LPush {
        key: String,
        values: Vec<Bytes>,
    },
    RPush {
        key: String,
        values: Vec<Bytes>,
    },
    LLen(String),
    LPop {
        key: String,
        count: Option<usize>,
    },
    LRange {
        key: String,
        start: i64,
        stop: i64,
    },
    BLPop {
        key: String,
        /// None = espera para sempre (timeout 0).
        timeout: Option<Duration>,
    },
    Unknown(String),
}

impl Command {
    /// Faz o parse de um Frame em um Command, validando a aridade.
    ///
    /// Nome de comando é case-insensitive. Argumentos faltando ou sobrando
    /// viram `WrongArity` com o nome do comando; comando desconhecido vira
    /// `Command::Unknown` (o handler responde sem tocar o store).
    pub fn from_frame(frame: Frame) -> Result<Command, CommandError> {
        let mut parse = Parse::new(frame)?;
        let name = parse
            .next_string()
            .map_err(|_| CommandError::InvalidArgument("empty command frame".into()))?;

        match build_command(&name.to_uppercase(), name.clone(), &mut parse) {
            Err(CommandError::MissingArguments) | Err(CommandError::TrailingArguments) => {
                Err(CommandError::WrongArity(name.to_lowercase()))
            }
            other => other,
        }
    }
}

fn build_command(
    upper: &str,
    original_name: String,
    parse: &mut Parse,
) -> Result<Command, CommandError> {
    let cmd = match upper {
        "PING" => {
            parse.finish()?;
            Command::Ping
        }
        "ECHO" => {
            let msg = parse.next_bytes()?;
            parse.finish()?;
            Command::Echo(msg)
        }
        "TYPE" => {
            let key = parse.next_string()?;
            parse.finish()?;
            Command::Type(key)
        }
        "GET" => {
            let key = parse.next_string()?;
            parse.finish()?;
            Command::Get(key)
        }
        "SET" => parse_set(parse)?,
        "LPUSH" => {
            let key = parse.next_string()?;
            let values = parse_values(parse)?;
            Command::LPush { key, values }
        }
        "RPUSH" => {
            let key = parse.next_string()?;
            let values = parse_values(parse)?;
            Command::RPush { key, values }
        }
        "LLEN" => {
            let key = parse.next_string()?;
            parse.finish()?;
            Command::LLen(key)
        }
        "LPOP" => {
            let key = parse.next_string()?;
            let count = if parse.has_remaining() {
                let n = parse.next_int()?;
                if n < 0 {
                    return Err(CommandError::InvalidArgument(
                        "value is out of range, must be positive".into(),
                    ));
                }
                Some(n as usize)
            } else {
                None
            };
            parse.finish()?;
            Command::LPop { key, count }
        }
        "LRANGE" => {
            let key = parse.next_string()?;
            let start = parse.next_int()?;
            let stop = parse.next_int()?;
            parse.finish()?;
            Command::LRange { key, start, stop }
        }
        "BLPOP" => {
            let key = parse.next_string()?;
            let timeout = parse_timeout(parse)?;
            parse.finish()?;
            Command::BLPop { key, timeout }
        }
        _ => Command::Unknown(original_name),
    };

    Ok(cmd)
}

/// Pelo menos um valor é obrigatório para LPUSH/RPUSH.
fn parse_values(parse: &mut Parse) -> Result<Vec<Bytes>, CommandError> {
    if !parse.has_remaining() {
        return Err(CommandError::MissingArguments);
    }
    let mut values = Vec::new();
    while parse.has_remaining() {
        values.push(parse.next_bytes()?);
    }
    Ok(values)
}

fn parse_set(parse: &mut Parse) -> Result<Command, CommandError> {
    let key = parse.next_string()?;
    let value = parse.next_bytes()?;

    let mut expire = None;
    while parse.has_remaining() {
        let opt = parse.next_string()?.to_uppercase();
        match opt.as_str() {
            "EX" => {
                let secs = parse.next_int()?;
                if secs <= 0 {
                    return Err(CommandError::InvalidArgument(
                        "invalid expire time in 'set' command".into(),
                    ));
                }
                expire = Some(Expiry::Seconds(secs as u64));
            }
            "PX" => {
                let ms = parse.next_int()?;
                if ms <= 0 {
                    return Err(CommandError::InvalidArgument(
                        "invalid expire time in 'set' command".into(),
                    ));
                }
                expire = Some(Expiry::Millis(ms as u64));
            }
            other => {
                return Err(CommandError::InvalidArgument(format!(
                    "unknown SET option '{other}'"
                )));
            }
        }
    }

    Ok(Command::Set { key, value, expire })
}

/// Timeout do BLPOP em segundos, com fração permitida. 0 = sem deadline.
fn parse_timeout(parse: &mut Parse) -> Result<Option<Duration>, CommandError> {
    let secs = parse.next_float()?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(CommandError::InvalidArgument("timeout is negative".into()));
    }
    if secs == 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|_| CommandError::InvalidArgument("timeout is out of range".into()))
}
