use bytes::Bytes;
use std::io::Cursor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, Instant, sleep};

use tidekv_protocol::Frame;

/// Helper: lê exatamente um frame de resposta do stream.
async fn read_reply(stream: &mut TcpStream, buf: &mut bytes::BytesMut) -> Frame {
    loop {
        let mut cursor = Cursor::new(&buf[..]);
        if Frame::check(&mut cursor).is_ok() {
            let len = cursor.position() as usize;
            cursor.set_position(0);
            let frame = Frame::parse(&mut cursor).unwrap();
            let _ = buf.split_to(len);
            return frame;
        }

        let n = stream.read_buf(buf).await.unwrap();
        assert!(n > 0, "server closed connection unexpectedly");
    }
}

/// Helper: envia um comando e retorna o frame de resposta.
async fn send_command(stream: &mut TcpStream, args: &[&str]) -> Frame {
    let frame = Frame::array_from_strs(args);
    let mut out = bytes::BytesMut::new();
    frame.encode(&mut out);
    stream.write_all(&out).await.unwrap();
    stream.flush().await.unwrap();

    let mut buf = bytes::BytesMut::with_capacity(4096);
    read_reply(stream, &mut buf).await
}

async fn start_server(port: u16) -> tokio::task::JoinHandle<()> {
    let handle = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{port}"))
            .await
            .unwrap();
        let db = tidekv_storage::Db::new();
        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        loop {
            let (socket, _) = listener.accept().await.unwrap();
            let db = db.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                let conn = tidekv_server::Connection::new(socket);
                let _ = tidekv_server::handle_connection(conn, db, &mut shutdown_rx).await;
            });
        }
    });

    // Aguardar servidor estar pronto
    sleep(Duration::from_millis(50)).await;
    handle
}

async fn connect(port: u16) -> TcpStream {
    TcpStream::connect(format!("127.0.0.1:{port}"))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_ping_pong() {
    let port = 16500;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    let response = send_command(&mut stream, &["PING"]).await;
    assert_eq!(response, Frame::Simple("PONG".into()));
}

#[tokio::test]
async fn test_echo() {
    let port = 16501;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    let response = send_command(&mut stream, &["ECHO", "hello world"]).await;
    assert_eq!(response, Frame::Bulk(Bytes::from("hello world")));
}

#[tokio::test]
async fn test_set_get() {
    let port = 16502;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    let response = send_command(&mut stream, &["SET", "mykey", "myvalue"]).await;
    assert_eq!(response, Frame::Simple("OK".into()));

    let response = send_command(&mut stream, &["GET", "mykey"]).await;
    assert_eq!(response, Frame::Bulk(Bytes::from("myvalue")));
}

#[tokio::test]
async fn test_get_never_written_key() {
    let port = 16503;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    let response = send_command(&mut stream, &["GET", "missing"]).await;
    assert_eq!(response, Frame::Null);

    let response = send_command(&mut stream, &["TYPE", "missing"]).await;
    assert_eq!(response, Frame::Simple("none".into()));
}

#[tokio::test]
async fn test_set_with_expiry_then_type_none() {
    let port = 16504;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    let response = send_command(&mut stream, &["SET", "k", "v", "PX", "100"]).await;
    assert_eq!(response, Frame::Simple("OK".into()));

    let response = send_command(&mut stream, &["GET", "k"]).await;
    assert_eq!(response, Frame::Bulk(Bytes::from("v")));

    sleep(Duration::from_millis(150)).await;

    let response = send_command(&mut stream, &["GET", "k"]).await;
    assert_eq!(response, Frame::Null);
    let response = send_command(&mut stream, &["TYPE", "k"]).await;
    assert_eq!(response, Frame::Simple("none".into()));
}

#[tokio::test]
async fn test_type_of_string_and_list() {
    let port = 16505;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    send_command(&mut stream, &["SET", "s", "v"]).await;
    send_command(&mut stream, &["RPUSH", "l", "a"]).await;

    assert_eq!(
        send_command(&mut stream, &["TYPE", "s"]).await,
        Frame::Simple("string".into())
    );
    assert_eq!(
        send_command(&mut stream, &["TYPE", "l"]).await,
        Frame::Simple("list".into())
    );
}

#[tokio::test]
async fn test_rpush_lrange_order() {
    let port = 16506;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    assert_eq!(
        send_command(&mut stream, &["RPUSH", "k", "a", "b"]).await,
        Frame::Integer(2)
    );
    assert_eq!(
        send_command(&mut stream, &["RPUSH", "k", "c"]).await,
        Frame::Integer(3)
    );
    assert_eq!(
        send_command(&mut stream, &["LRANGE", "k", "0", "-1"]).await,
        Frame::array_from_strs(&["a", "b", "c"])
    );
}

#[tokio::test]
async fn test_lpush_order() {
    let port = 16507;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    send_command(&mut stream, &["LPUSH", "k", "a"]).await;
    send_command(&mut stream, &["LPUSH", "k", "b"]).await;
    assert_eq!(
        send_command(&mut stream, &["LRANGE", "k", "0", "-1"]).await,
        Frame::array_from_strs(&["b", "a"])
    );
}

#[tokio::test]
async fn test_lrange_and_llen_absent_key() {
    let port = 16508;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    assert_eq!(
        send_command(&mut stream, &["LRANGE", "k", "0", "-1"]).await,
        Frame::Array(vec![])
    );
    assert_eq!(
        send_command(&mut stream, &["LLEN", "k"]).await,
        Frame::Integer(0)
    );
}

#[tokio::test]
async fn test_lpop_count_and_key_removal() {
    let port = 16509;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    send_command(&mut stream, &["RPUSH", "k", "a", "b", "c"]).await;

    assert_eq!(
        send_command(&mut stream, &["LPOP", "k", "2"]).await,
        Frame::array_from_strs(&["a", "b"])
    );
    assert_eq!(
        send_command(&mut stream, &["LRANGE", "k", "0", "-1"]).await,
        Frame::array_from_strs(&["c"])
    );

    // sem count: bulk simples; esvaziar remove a chave
    assert_eq!(
        send_command(&mut stream, &["LPOP", "k"]).await,
        Frame::Bulk(Bytes::from("c"))
    );
    assert_eq!(
        send_command(&mut stream, &["TYPE", "k"]).await,
        Frame::Simple("none".into())
    );
}

#[tokio::test]
async fn test_lpop_absent_key_null_replies() {
    let port = 16510;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    assert_eq!(send_command(&mut stream, &["LPOP", "k"]).await, Frame::Null);
    assert_eq!(
        send_command(&mut stream, &["LPOP", "k", "2"]).await,
        Frame::NullArray
    );
}

#[tokio::test]
async fn test_blpop_served_by_other_connection() {
    let port = 16511;
    let _server = start_server(port).await;

    let mut blocked = connect(port).await;
    let waiter = tokio::spawn(async move {
        send_command(&mut blocked, &["BLPOP", "q", "5"]).await
    });

    sleep(Duration::from_millis(100)).await;

    let mut pusher = connect(port).await;
    assert_eq!(
        send_command(&mut pusher, &["RPUSH", "q", "x"]).await,
        Frame::Integer(1)
    );

    assert_eq!(
        waiter.await.unwrap(),
        Frame::Array(vec![
            Frame::Bulk(Bytes::from("q")),
            Frame::Bulk(Bytes::from("x"))
        ])
    );

    // o push foi consumido pelo waiter: LPOP subsequente não vê nada
    assert_eq!(
        send_command(&mut pusher, &["LPOP", "q"]).await,
        Frame::Null
    );
}

#[tokio::test]
async fn test_blpop_timeout_resolves_null_array() {
    let port = 16512;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    let started = Instant::now();
    let response = send_command(&mut stream, &["BLPOP", "q", "0.3"]).await;
    assert_eq!(response, Frame::NullArray);
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_blpop_disconnect_cancels_waiter() {
    let port = 16513;
    let _server = start_server(port).await;

    // primeiro cliente bloqueia e desconecta sem esperar resposta
    {
        let mut doomed = connect(port).await;
        let frame = Frame::array_from_strs(&["BLPOP", "q", "0"]);
        let mut out = bytes::BytesMut::new();
        frame.encode(&mut out);
        doomed.write_all(&out).await.unwrap();
        doomed.flush().await.unwrap();
        sleep(Duration::from_millis(100)).await;
    } // socket fechado aqui

    sleep(Duration::from_millis(100)).await;

    // o push não pode ser perdido para o waiter cancelado
    let mut stream = connect(port).await;
    assert_eq!(
        send_command(&mut stream, &["RPUSH", "q", "x"]).await,
        Frame::Integer(1)
    );
    assert_eq!(
        send_command(&mut stream, &["LRANGE", "q", "0", "-1"]).await,
        Frame::array_from_strs(&["x"])
    );
}

#[tokio::test]
async fn test_frame_split_across_two_writes() {
    let port = 16514;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    // frame cortado no meio de um argumento
    let wire = b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n";
    let (first, second) = wire.split_at(15);

    stream.write_all(first).await.unwrap();
    stream.flush().await.unwrap();
    sleep(Duration::from_millis(50)).await;
    stream.write_all(second).await.unwrap();
    stream.flush().await.unwrap();

    let mut buf = bytes::BytesMut::with_capacity(4096);
    let response = read_reply(&mut stream, &mut buf).await;
    assert_eq!(response, Frame::Bulk(Bytes::from("hello")));
}

#[tokio::test]
async fn test_pipelined_commands_in_one_write() {
    let port = 16515;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    let mut out = bytes::BytesMut::new();
    Frame::array_from_strs(&["SET", "a", "1"]).encode(&mut out);
    Frame::array_from_strs(&["GET", "a"]).encode(&mut out);
    stream.write_all(&out).await.unwrap();
    stream.flush().await.unwrap();

    let mut buf = bytes::BytesMut::with_capacity(4096);
    assert_eq!(
        read_reply(&mut stream, &mut buf).await,
        Frame::Simple("OK".into())
    );
    assert_eq!(
        read_reply(&mut stream, &mut buf).await,
        Frame::Bulk(Bytes::from("1"))
    );
}

#[tokio::test]
async fn test_unknown_command_keeps_connection_usable() {
    let port = 16516;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    let response = send_command(&mut stream, &["FOOBAR"]).await;
    assert!(matches!(
        response,
        Frame::Error(msg) if msg.contains("unknown command 'FOOBAR'")
    ));

    // a conexão continua aberta e utilizável
    assert_eq!(
        send_command(&mut stream, &["PING"]).await,
        Frame::Simple("PONG".into())
    );
}

#[tokio::test]
async fn test_wrong_arity_error_reply() {
    let port = 16517;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    let response = send_command(&mut stream, &["GET"]).await;
    assert!(matches!(
        response,
        Frame::Error(msg) if msg.contains("wrong number of arguments for 'get'")
    ));
}

#[tokio::test]
async fn test_wrongtype_error_reply() {
    let port = 16518;
    let _server = start_server(port).await;
    let mut stream = connect(port).await;

    send_command(&mut stream, &["SET", "k", "v"]).await;
    let response = send_command(&mut stream, &["RPUSH", "k", "a"]).await;
    assert!(matches!(
        response,
        Frame::Error(msg) if msg.starts_with("WRONGTYPE")
    ));

    // SET substitui qualquer variante, inclusive listas
    send_command(&mut stream, &["RPUSH", "l", "a"]).await;
    assert_eq!(
        send_command(&mut stream, &["SET", "l", "v"]).await,
        Frame::Simple("OK".into())
    );
    assert_eq!(
        send_command(&mut stream, &["TYPE", "l"]).await,
        Frame::Simple("string".into())
    );
}

#[tokio::test]
async fn test_blpop_fifo_across_connections() {
    let port = 16519;
    let _server = start_server(port).await;

    let mut first = connect(port).await;
    let w1 = tokio::spawn(async move { send_command(&mut first, &["BLPOP", "q", "5"]).await });
    sleep(Duration::from_millis(100)).await;

    let mut second = connect(port).await;
    let w2 = tokio::spawn(async move { send_command(&mut second, &["BLPOP", "q", "5"]).await });
    sleep(Duration::from_millis(100)).await;

    let mut pusher = connect(port).await;
    send_command(&mut pusher, &["RPUSH", "q", "1"]).await;
    send_command(&mut pusher, &["RPUSH", "q", "2"]).await;

    assert_eq!(
        w1.await.unwrap(),
        Frame::Array(vec![
            Frame::Bulk(Bytes::from("q")),
            Frame::Bulk(Bytes::from("1"))
        ])
    );
    assert_eq!(
        w2.await.unwrap(),
        Frame::Array(vec![
            Frame::Bulk(Bytes::from("q")),
            Frame::Bulk(Bytes::from("2"))
        ])
    );
}
