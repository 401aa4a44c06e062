use serde::{Deserialize, Serialize};
use std::sync::Arc;
use typed_msg::{
    ChannelConfig, ChannelConn, Close, Decoder, Encoder, JsonCodec, MsgError, ReaderChainer,
    ReaderGiver, ReaderTaker, TypedExchangeReader, Void, WriterGiver, exchange_conn_of,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EchoRequest {
    message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EchoResponse {
    message: String,
    length: usize,
}

struct EchoService;

impl ReaderTaker<TypedExchangeReader<JsonCodec>> for EchoService {
    fn reader_take(&self, mut reader: TypedExchangeReader<JsonCodec>) -> typed_msg::Result<()> {
        let req: EchoRequest = reader.decode()?;
        println!("[Server] echo(\"{}\")", req.message);

        let mut reply = reader.writer()?;
        let length = req.message.len();
        reply.encode(&EchoResponse {
            message: req.message,
            length,
        })?;
        MsgError::join([reply.close(), reader.close()])
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (client_conn, server_conn) = ChannelConn::create_pair("echo", ChannelConfig::default())?;

    let dispatcher = server_conn.clone();
    let server = exchange_conn_of(server_conn, JsonCodec)?;
    server.reader_chain(Arc::new(EchoService))?;
    let worker = dispatcher.spawn_dispatcher()?;
    println!("[Server] Waiting for requests\n");

    let client_stats = client_conn.clone();
    let mut client = exchange_conn_of(client_conn, JsonCodec)?;
    // the client serves nothing; inbound exchanges are discarded
    let discard: Arc<dyn ReaderTaker<TypedExchangeReader<JsonCodec>>> = Arc::new(Void);
    client.reader_chain(discard)?;

    for message in ["hello", "typed exchanges"] {
        println!("[Client] Sending \"{message}\"");
        let mut w = client.writer()?;
        w.encode(&EchoRequest {
            message: message.to_string(),
        })?;

        let mut reply = w.reader()?;
        let resp: EchoResponse = reply.decode()?;
        println!(
            "[Client] Got \"{}\" (length {})\n",
            resp.message, resp.length
        );
        reply.close()?;
        w.close()?;
    }

    // closing before asking for the reply cancels the request
    println!("[Client] Abandoning a request");
    let mut w = client.writer()?;
    w.encode(&EchoRequest {
        message: "never sent".to_string(),
    })?;
    w.close()?;

    println!("{}", client_stats.stats());

    drop(client);
    drop(client_stats);
    drop(server);
    drop(dispatcher);
    worker.join().map_err(|_| "dispatcher panicked")??;

    println!("[Server] Shutting down");
    Ok(())
}
