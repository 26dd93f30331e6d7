use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use tidekv_common::StorageError;
use tidekv_protocol::Expiry;

use crate::blocking::{WaitHandle, WaiterTable};
use crate::entry::{Entry, KeyType, Value};

/// Lado da inserção em lista.
#[derive(Debug, Clone, Copy)]
enum Side {
    Left,
    Right,
}

/// Estado compartilhado entre todas as conexões.
///
/// Disciplina de locks: quem precisa da tabela de waiters adquire esse lock
/// antes do guard de entrada do DashMap; operações simples tocam só o guard
/// da entrada. O push segura ambos do insert até a entrega, então a
/// sequência push-entrega é indivisível em relação a qualquer outro push ou
/// pop da mesma chave.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) data: DashMap<String, Entry>,
    waiters: Mutex<WaiterTable>,
}

impl Shared {
    pub(crate) fn lock_waiters(&self) -> MutexGuard<'_, WaiterTable> {
        // poisoning indica pânico com o lock em mãos: defeito interno
        self.waiters.lock().expect("waiter table lock poisoned")
    }
}

/// Handle para o banco de dados in-memory.
///
/// Expiração é exclusivamente lazy: uma entrada expirada é removida no
/// primeiro acesso após o deadline; não existe sweep em background.
#[derive(Debug, Clone)]
pub struct Db {
    shared: Arc<Shared>,
}

impl Db {
    pub fn new() -> Self {
        Db {
            shared: Arc::new(Shared {
                data: DashMap::new(),
                waiters: Mutex::new(WaiterTable::default()),
            }),
        }
    }

    // --- String operations ---

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let entry = self.shared.data.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.shared.data.remove(key);
            debug!(key, "chave expirada removida no acesso");
            return None;
        }
        match &entry.value {
            Value::String(data) => Some(data.clone()),
            Value::List(_) => None,
        }
    }

    /// Substitui qualquer entrada anterior, inclusive listas.
    pub fn set(&self, key: String, value: Bytes, expire: Option<Expiry>) {
        let expires_at = expire.map(|e| Instant::now() + e.as_duration());
        self.shared
            .data
            .insert(key, Entry::new(Value::String(value), expires_at));
    }

    /// Classifica a chave para o comando TYPE, com o mesmo check lazy de
    /// expiração do `get`.
    pub fn type_of(&self, key: &str) -> KeyType {
        let Some(entry) = self.shared.data.get(key) else {
            return KeyType::None;
        };
        if entry.is_expired() {
            drop(entry);
            self.shared.data.remove(key);
            return KeyType::None;
        }
        match &entry.value {
            Value::String(_) => KeyType::String,
            Value::List(_) => KeyType::List,
        }
    }

    // --- List operations ---

    pub fn lpush(&self, key: &str, values: &[Bytes]) -> Result<usize, StorageError> {
        self.push(key, values, Side::Left)
    }

    pub fn rpush(&self, key: &str, values: &[Bytes]) -> Result<usize, StorageError> {
        self.push(key, values, Side::Right)
    }

    /// Insere e em seguida entrega a waiters pendentes, tudo sob o lock da
    /// tabela de waiters + guard da entrada. Retorna o comprimento após a
    /// inserção (antes do handoff).
    fn push(&self, key: &str, values: &[Bytes], side: Side) -> Result<usize, StorageError> {
        let mut waiters = self.shared.lock_waiters();

        let mut entry = self
            .shared
            .data
            .entry(key.to_string())
            .or_insert_with(Entry::empty_list);
        if entry.is_expired() {
            *entry = Entry::empty_list();
        }
        let Value::List(list) = &mut entry.value else {
            return Err(StorageError::WrongType);
        };

        match side {
            Side::Right => list.extend(values.iter().cloned()),
            // cada prepend insere antes do anterior: o último argumento
            // termina na cabeça da lista
            Side::Left => {
                for v in values {
                    list.push_front(v.clone());
                }
            }
        }
        let len = list.len();

        waiters.deliver(key, list);

        let emptied = list.is_empty();
        drop(entry);
        if emptied {
            self.shared.data.remove(key);
        }
        Ok(len)
    }

    pub fn llen(&self, key: &str) -> Result<usize, StorageError> {
        let Some(entry) = self.shared.data.get(key) else {
            return Ok(0);
        };
        if entry.is_expired() {
            drop(entry);
            self.shared.data.remove(key);
            return Ok(0);
        }
        match &entry.value {
            Value::List(list) => Ok(list.len()),
            Value::String(_) => Err(StorageError::WrongType),
        }
    }

    /// Remove até `count` elementos da cabeça (1 sem count). `Ok(None)`
    /// indica chave ausente (o handler responde null bulk ou null array).
    /// Uma lista que fica vazia tem a chave removida do store, então TYPE
    /// passa a responder `none`.
    pub fn lpop(&self, key: &str, count: Option<usize>) -> Result<Option<Vec<Bytes>>, StorageError> {
        let Some(mut entry) = self.shared.data.get_mut(key) else {
            return Ok(None);
        };
        if entry.is_expired() {
            drop(entry);
            self.shared.data.remove(key);
            return Ok(None);
        }
        let Value::List(list) = &mut entry.value else {
            return Err(StorageError::WrongType);
        };

        let n = count.unwrap_or(1).min(list.len());
        let popped: Vec<Bytes> = list.drain(..n).collect();
        let emptied = list.is_empty();
        drop(entry);
        if emptied {
            self.shared.data.remove(key);
        }
        Ok(Some(popped))
    }

    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>, StorageError> {
        let Some(entry) = self.shared.data.get(key) else {
            return Ok(Vec::new());
        };
        if entry.is_expired() {
            drop(entry);
            self.shared.data.remove(key);
            return Ok(Vec::new());
        }
        let Value::List(list) = &entry.value else {
            return Err(StorageError::WrongType);
        };

        let len = list.len() as i64;
        // índices negativos contam do fim; start negativo demais vira 0
        let start = if start < 0 { (len + start).max(0) } else { start };
        if start >= len {
            return Ok(Vec::new());
        }
        // stop negativo converte para len+stop; se continua negativo o
        // intervalo é vazio (não clampa para -1, que indexaria errado)
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if stop < start {
            return Ok(Vec::new());
        }

        Ok(list
            .range(start as usize..=stop as usize)
            .cloned()
            .collect())
    }

    // --- Blocking pop ---

    /// Pop bloqueante da cabeça. Com a lista não vazia resolve imediatamente
    /// sem criar waiter; caso contrário registra um waiter FIFO e suspende
    /// até a entrega por um push ou até o deadline (`None` = sem deadline).
    /// Timeout resolve para `Ok(None)`.
    pub async fn blpop(
        &self,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Bytes>, StorageError> {
        let handle = {
            // o check de lista vazia e o registro do waiter ficam na mesma
            // seção crítica que o push usa para entregar
            let mut waiters = self.shared.lock_waiters();
            if let Some(value) = self.lpop(key, None)?.and_then(|mut v| v.pop()) {
                return Ok(Some(value));
            }
            let (seq, rx) = waiters.register(key);
            WaitHandle::new(self.shared.clone(), key.to_string(), seq, rx)
        };

        Ok(handle.wait(timeout).await)
    }
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}
