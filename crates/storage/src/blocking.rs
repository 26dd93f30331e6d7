use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time;
use tracing::warn;

use crate::db::Shared;
use crate::entry::{Entry, Value};

/// Um waiter pendente de BLPOP: sequência de chegada + canal de entrega.
///
/// O sender é consumido pelo primeiro send, o que impede entrega dupla.
/// Estados possíveis: pendente (na fila), entregue (removido da fila com
/// send), timeout ou cancelado (removido sem send).
#[derive(Debug)]
struct Waiter {
    seq: u64,
    tx: oneshot::Sender<Bytes>,
}

/// Filas de waiters por chave, em ordem de chegada (FIFO).
///
/// Protegido por um único Mutex dentro de `Shared`. Ordem de locks em todo
/// o crate: tabela de waiters antes do guard de entrada do DashMap.
#[derive(Debug, Default)]
pub(crate) struct WaiterTable {
    next_seq: u64,
    queues: HashMap<String, VecDeque<Waiter>>,
}

impl WaiterTable {
    /// Registra um novo waiter no fim da fila da chave.
    pub(crate) fn register(&mut self, key: &str) -> (u64, oneshot::Receiver<Bytes>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let (tx, rx) = oneshot::channel();
        self.queues
            .entry(key.to_string())
            .or_default()
            .push_back(Waiter { seq, tx });
        (seq, rx)
    }

    /// Remove um waiter ainda pendente. Retorna false se ele já saiu da
    /// fila (ou seja, já foi entregue).
    pub(crate) fn remove(&mut self, key: &str, seq: u64) -> bool {
        let Some(queue) = self.queues.get_mut(key) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|w| w.seq != seq);
        let removed = queue.len() < before;
        if queue.is_empty() {
            self.queues.remove(key);
        }
        removed
    }

    /// Entrega elementos da cabeça da lista aos waiters pendentes, em ordem
    /// de chegada. Um elemento só é consumido se o send teve sucesso; um
    /// receiver já descartado devolve o valor à cabeça e a fila avança.
    ///
    /// Chamado pelo push com o lock da tabela e o guard da entrada ambos em
    /// mãos, tornando push-então-entrega indivisível por chave.
    pub(crate) fn deliver(&mut self, key: &str, list: &mut VecDeque<Bytes>) {
        let Some(queue) = self.queues.get_mut(key) else {
            return;
        };
        while let Some(value) = list.pop_front() {
            match queue.pop_front() {
                Some(waiter) => {
                    if let Err(value) = waiter.tx.send(value) {
                        list.push_front(value);
                    }
                }
                None => {
                    list.push_front(value);
                    break;
                }
            }
        }
        if queue.is_empty() {
            self.queues.remove(key);
        }
    }

    /// Reentrega a cabeça da lista após uma devolução, caso outro waiter
    /// esteja pendente para a mesma chave.
    fn deliver_front(&mut self, shared: &Shared, key: &str) {
        if let Some(mut entry) = shared.data.get_mut(key)
            && let Value::List(list) = &mut entry.value
        {
            self.deliver(key, list);
            let emptied = list.is_empty();
            drop(entry);
            if emptied {
                shared.data.remove(key);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self, key: &str) -> usize {
        self.queues.get(key).map(|q| q.len()).unwrap_or(0)
    }
}

/// Handle de um waiter registrado, devolvido por `Db::blpop`.
///
/// `wait` resolve na entrega ou no deadline (via `tokio::time::timeout`,
/// sem polling). Descartar o handle sem consumir cancela o waiter: se ele
/// ainda estava na fila é removido; se um elemento já tinha sido entregue
/// mas não consumido, o elemento volta para a cabeça da lista.
#[derive(Debug)]
pub(crate) struct WaitHandle {
    shared: Arc<Shared>,
    key: String,
    seq: u64,
    rx: Option<oneshot::Receiver<Bytes>>,
}

impl WaitHandle {
    pub(crate) fn new(
        shared: Arc<Shared>,
        key: String,
        seq: u64,
        rx: oneshot::Receiver<Bytes>,
    ) -> Self {
        Self {
            shared,
            key,
            seq,
            rx: Some(rx),
        }
    }

    pub(crate) async fn wait(mut self, timeout: Option<Duration>) -> Option<Bytes> {
        let rx = self.rx.as_mut().expect("waiter já consumido");
        let delivered = match timeout {
            None => rx.await.ok(),
            Some(deadline) => match time::timeout(deadline, rx).await {
                Ok(result) => result.ok(),
                Err(_elapsed) => None,
            },
        };

        match delivered {
            Some(value) => {
                self.rx = None; // consumido: Drop não tem o que devolver
                Some(value)
            }
            None => {
                // Timeout: re-checa sob o lock. Se o waiter não está mais na
                // fila, a entrega venceu a corrida e o valor está no canal.
                let mut waiters = self.shared.lock_waiters();
                if waiters.remove(&self.key, self.seq) {
                    self.rx = None;
                    None
                } else {
                    drop(waiters);
                    self.rx.take().and_then(|mut rx| rx.try_recv().ok())
                }
            }
        }
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        let mut waiters = self.shared.lock_waiters();
        if waiters.remove(&self.key, self.seq) {
            // cancelado enquanto pendente (ex.: conexão encerrada)
            return;
        }
        // Entregue mas nunca consumido: devolve o elemento à cabeça para o
        // próximo waiter ou pop.
        if let Ok(value) = rx.try_recv() {
            let mut entry = self
                .shared
                .data
                .entry(self.key.clone())
                .or_insert_with(Entry::empty_list);
            match &mut entry.value {
                Value::List(list) => {
                    list.push_front(value);
                    drop(entry);
                    waiters.deliver_front(&self.shared, &self.key);
                }
                Value::String(_) => {
                    warn!(key = %self.key, "elemento entregue descartado: chave agora é string");
                }
            }
        }
    }
}
