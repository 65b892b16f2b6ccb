use std::{env, io, path::PathBuf};

use comms::{
    OnoReceiver,
    msg::{Command, Msg},
};
use log::{info, warn};
use tokio::{io::AsyncRead, net::TcpListener, signal, sync::mpsc};

use worker::WorkerBuilder;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_CHECKPOINT_ROOT: &str = "./checkpoints";

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let addr = format!(
        "{}:{}",
        env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
        env::var("PORT").map_err(io::Error::other)?,
    );

    let checkpoint_root = env::var("CHECKPOINT_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CHECKPOINT_ROOT));

    let listener = TcpListener::bind(&addr).await?;
    info!("listening at {addr}");

    let (stream, addr) = listener.accept().await?;
    let (rx, tx) = stream.into_split();
    let (rx, mut tx) = comms::channel(rx, tx);
    info!("supervisor connected from {addr}");

    let mut handle = WorkerBuilder::new()
        .with_checkpoint_root(checkpoint_root)
        .spawn();

    let (inbound_tx, mut inbound) = mpsc::channel(16);
    tokio::spawn(read_supervisor(rx, inbound_tx));

    loop {
        tokio::select! {
            msg = inbound.recv() => match msg {
                Some(Ok(Msg::Control(Command::Disconnect))) | None => {
                    info!("supervisor disconnected");
                    break;
                }
                Some(Ok(Msg::Control(cmd))) => handle.send(cmd).await?,
                Some(Ok(msg)) => warn!("expected a control message, got {msg:?}"),
                Some(Err(e)) => {
                    warn!("supervisor connection failed: {e}");
                    if e.kind() == io::ErrorKind::InvalidData {
                        tx.send(&Msg::Err(e.to_string())).await?;
                    }
                }
            },
            event = handle.next_event() => match event {
                Some(event) => tx.send(&Msg::Event(event)).await?,
                None => break,
            },
            _ = signal::ctrl_c() => {
                info!("received SIGINT, stopping");
                handle.send(Command::Stop).await?;
                break;
            }
        }
    }

    info!("wrapping up, disconnecting...");
    handle.shutdown().await?;
    tx.shutdown().await
}

/// Forwards every message of the supervisor until its connection breaks.
///
/// The first error is forwarded too, the stream can't be trusted to be framed after it.
async fn read_supervisor<R>(mut rx: OnoReceiver<R>, inbound: mpsc::Sender<io::Result<Msg>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let msg = match rx.recv::<Msg>().await {
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            msg => msg,
        };

        let failed = msg.is_err();
        if inbound.send(msg).await.is_err() || failed {
            break;
        }
    }
}
