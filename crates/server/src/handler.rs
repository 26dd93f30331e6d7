use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

use tidekv_common::{ConnectionError, StorageError};
use tidekv_protocol::{Command, Frame};
use tidekv_storage::Db;

use crate::Connection;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// Loop principal de tratamento de uma conexão.
///
/// Erros de protocolo fecham a conexão sem resposta; erros de comando
/// (desconhecido, aridade, tipo errado) viram reply de erro e a conexão
/// continua utilizável.
pub async fn handle_connection(
    mut conn: Connection,
    db: Db,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), ConnectionError> {
    loop {
        let frame = tokio::select! {
            result = conn.read_frame() => result?,
            _ = shutdown.recv() => {
                return Ok(());
            }
        };

        let frame = match frame {
            Some(f) => f,
            None => return Ok(()), // EOF
        };

        let cmd = match Command::from_frame(frame) {
            Ok(cmd) => cmd,
            Err(e) => {
                conn.write_frame(&Frame::Error(format!("ERR {e}"))).await?;
                continue;
            }
        };

        debug!("comando recebido: {cmd:?}");

        match cmd {
            Command::BLPop { key, timeout } => {
                if !blocking_pop(&mut conn, &db, &key, timeout).await? {
                    return Ok(());
                }
            }
            cmd => {
                let response = execute_command(&cmd, &db);
                conn.write_frame(&response).await?;
            }
        }
    }
}

/// Executa um comando não bloqueante e retorna o Frame de resposta.
fn execute_command(cmd: &Command, db: &Db) -> Frame {
    match cmd {
        Command::Ping => Frame::Simple("PONG".into()),
        Command::Echo(msg) => Frame::Bulk(msg.clone()),
        Command::Type(key) => Frame::Simple(db.type_of(key).as_str().into()),
        Command::Get(key) => match db.get(key) {
            Some(value) => Frame::Bulk(value),
            None => Frame::Null,
        },
        Command::Set { key, value, expire } => {
            db.set(key.clone(), value.clone(), *expire);
            Frame::Simple("OK".into())
        }
        Command::LPush { key, values } => match db.lpush(key, values) {
            Ok(len) => Frame::Integer(len as i64),
            Err(StorageError::WrongType) => Frame::Error(WRONGTYPE.into()),
        },
        Command::RPush { key, values } => match db.rpush(key, values) {
            Ok(len) => Frame::Integer(len as i64),
            Err(StorageError::WrongType) => Frame::Error(WRONGTYPE.into()),
        },
        Command::LLen(key) => match db.llen(key) {
            Ok(len) => Frame::Integer(len as i64),
            Err(StorageError::WrongType) => Frame::Error(WRONGTYPE.into()),
        },
        Command::LPop { key, count } => match db.lpop(key, *count) {
            // chave ausente: null bulk sem count, null array com count
            Ok(None) => match count {
                Some(_) => Frame::NullArray,
                None => Frame::Null,
            },
            Ok(Some(items)) => match count {
                Some(_) => Frame::Array(items.into_iter().map(Frame::Bulk).collect()),
                None => match items.into_iter().next() {
                    Some(value) => Frame::Bulk(value),
                    None => Frame::Null,
                },
            },
            Err(StorageError::WrongType) => Frame::Error(WRONGTYPE.into()),
        },
        Command::LRange { key, start, stop } => match db.lrange(key, *start, *stop) {
            Ok(items) => Frame::Array(items.into_iter().map(Frame::Bulk).collect()),
            Err(StorageError::WrongType) => Frame::Error(WRONGTYPE.into()),
        },
        Command::BLPop { .. } => unreachable!("tratado no loop da conexão"),
        Command::Unknown(name) => Frame::Error(format!("ERR unknown command '{name}'")),
    }
}

/// BLPOP: suspende a conexão até entrega ou deadline, observando o socket
/// para detectar desconexão. EOF do peer descarta o future do blpop e o
/// Drop do waiter o remove da fila. Bytes que chegarem durante a suspensão
/// ficam no buffer como comandos pipelined.
///
/// Retorna false quando a conexão deve ser encerrada.
async fn blocking_pop(
    conn: &mut Connection,
    db: &Db,
    key: &str,
    timeout: Option<Duration>,
) -> Result<bool, ConnectionError> {
    let wait = db.blpop(key, timeout);
    tokio::pin!(wait);

    let result = loop {
        tokio::select! {
            result = &mut wait => break result,
            read = conn.fill_buffer() => {
                if read? == 0 {
                    return Ok(false);
                }
            }
        }
    };

    let response = match result {
        Ok(Some(value)) => Frame::Array(vec![Frame::bulk(key), Frame::Bulk(value)]),
        Ok(None) => Frame::NullArray, // timeout não é erro
        Err(StorageError::WrongType) => Frame::Error(WRONGTYPE.into()),
    };
    conn.write_frame(&response).await?;
    Ok(true)
}
