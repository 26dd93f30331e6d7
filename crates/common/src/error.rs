/// Erros de parsing do protocolo RESP.
///
/// Qualquer variante exceto `Incomplete` é fatal para a conexão: ela é
/// fechada sem resposta. `Incomplete` apenas sinaliza que o buffer ainda
/// não contém um frame inteiro.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame incompleto")]
    Incomplete,
    #[error("byte de tipo inválido: {0:#x}")]
    InvalidFrameType(u8),
    #[error("inteiro inválido: {0}")]
    InvalidInteger(String),
    #[error("comprimento de bulk inválido: {0}")]
    InvalidBulkLength(i64),
    #[error("bulk sem terminador CRLF")]
    MissingDelimiter,
    #[error("frame excede tamanho máximo ({0} bytes)")]
    FrameTooLarge(usize),
    #[error("encoding inválido: {0}")]
    InvalidEncoding(String),
}

/// Erros de armazenamento/engine de dados.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("operação contra chave com tipo errado")]
    WrongType,
}

/// Erros de conexão TCP.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("conexão resetada pelo peer")]
    ConnectionReset,
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Erros de parsing/validação de comandos.
///
/// As mensagens destas variantes vão para o cliente (prefixadas com "ERR"),
/// então seguem o texto de resposta do protocolo em inglês.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("wrong number of arguments for '{0}'")]
    WrongArity(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("missing arguments")]
    MissingArguments,
    #[error("trailing arguments")]
    TrailingArguments,
}

/// Erro top-level do TideKV.
#[derive(Debug, thiserror::Error)]
pub enum TideError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Result type alias.
pub type TideResult<T> = Result<T, TideError>;

// Conversão implícita de io::Error → TideError (via ConnectionError)
impl From<std::io::Error> for TideError {
    fn from(e: std::io::Error) -> Self {
        TideError::Connection(ConnectionError::Io(e))
    }
}
