use bytes::Bytes;
use std::collections::VecDeque;
use tokio::time::Instant;

/// Tipo do valor armazenado.
#[derive(Debug, Clone)]
pub enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
}

/// Entrada no store: valor + TTL opcional.
///
/// Apenas strings carregam expiração (SET EX/PX é o único ponto de entrada
/// de TTL); listas sempre têm `expires_at = None`.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub expires_at: Option<Instant>,
}

impl Entry {
    pub fn new(value: Value, expires_at: Option<Instant>) -> Self {
        Self { value, expires_at }
    }

    pub fn empty_list() -> Self {
        Self::new(Value::List(VecDeque::new()), None)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|t| Instant::now() >= t)
            .unwrap_or(false)
    }
}

/// Classificação de uma chave para o comando TYPE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    None,
    String,
    List,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::None => "none",
            KeyType::String => "string",
            KeyType::List => "list",
        }
    }
}
