use std::io::{self, Cursor, Write};

use bytes::BytesMut;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tidekv_common::{DEFAULT_HOST, DEFAULT_PORT};
use tidekv_protocol::Frame;

#[derive(Parser, Debug)]
#[command(name = "tidekv-cli", about = "Cliente de linha de comando do TideKV")]
struct Args {
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Comando para executar diretamente (modo não interativo)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

/// Conexão cliente com buffer de leitura persistente, para que respostas
/// fragmentadas entre reads não se percam entre requisições.
struct Client {
    stream: TcpStream,
    buffer: BytesMut,
}

impl Client {
    async fn connect(addr: &str) -> anyhow::Result<Client> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Client {
            stream,
            buffer: BytesMut::with_capacity(4096),
        })
    }

    async fn request(&mut self, tokens: &[String]) -> anyhow::Result<Frame> {
        let args: Vec<&str> = tokens.iter().map(|s| s.as_str()).collect();
        let mut out = BytesMut::new();
        Frame::array_from_strs(&args).encode(&mut out);
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;

        loop {
            let mut cursor = Cursor::new(&self.buffer[..]);
            if Frame::check(&mut cursor).is_ok() {
                let consumed = cursor.position() as usize;
                cursor.set_position(0);
                let frame =
                    Frame::parse(&mut cursor).map_err(|e| anyhow::anyhow!("resposta inválida: {e}"))?;
                let _ = self.buffer.split_to(consumed);
                return Ok(frame);
            }

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                anyhow::bail!("servidor fechou a conexão");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let mut client = Client::connect(&addr).await?;

    // Modo comando único (via argumentos)
    if !args.command.is_empty() {
        let response = client.request(&args.command).await?;
        println!("{}", format_frame(&response));
        return Ok(());
    }

    println!("Conectado a {addr}");

    let stdin = io::stdin();
    let mut input = String::new();

    loop {
        print!("tidekv> ");
        io::stdout().flush()?;

        input.clear();
        if stdin.read_line(&mut input)? == 0 {
            break; // EOF
        }

        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }

        let tokens = tokenize(line);
        if tokens.is_empty() {
            continue;
        }

        match client.request(&tokens).await {
            Ok(response) => println!("{}", format_frame(&response)),
            Err(e) => {
                println!("(error) {e}");
                break;
            }
        }
    }

    Ok(())
}

/// Tokeniza a linha de input com suporte a strings quoted.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) if c == '\\' => match chars.next() {
                Some('n') => current.push('\n'),
                Some('t') => current.push('\t'),
                Some(escaped) => current.push(escaped),
                None => current.push('\\'),
            },
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Formata um frame para exibição humana, no estilo do redis-cli.
fn format_frame(frame: &Frame) -> String {
    match frame {
        Frame::Simple(s) => s.clone(),
        Frame::Error(s) => format!("(error) {s}"),
        Frame::Integer(n) => format!("(integer) {n}"),
        Frame::Bulk(data) => match std::str::from_utf8(data) {
            Ok(s) => format!("\"{s}\""),
            Err(_) => format!("(binary) {} bytes", data.len()),
        },
        Frame::Null | Frame::NullArray => "(nil)".into(),
        Frame::Array(frames) => {
            if frames.is_empty() {
                return "(empty array)".into();
            }
            frames
                .iter()
                .enumerate()
                .map(|(i, f)| format!("{}) {}", i + 1, format_frame(f)))
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}
