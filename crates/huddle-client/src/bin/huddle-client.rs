use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use webrtc::track::track_remote::TrackRemote;

use huddle_client::{
    signaling, Command, MediaSink, Orchestrator, PeerSinks, RoomEvent, RtcPlatform, SinkProvider,
    TrackKind,
};
use huddle_common::helpers::is_valid_room_id;
use huddle_common::{IceServer, ParticipantId, RoomId};

#[derive(Parser, Debug)]
#[command(name = "huddle-client", version, about = "Join a Huddle room from the terminal")]
struct Args {
    /// Gateway signaling endpoint.
    #[arg(long, env = "HUDDLE_URL", default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    #[arg(long, env = "HUDDLE_ROOM")]
    room: String,

    /// ICE server URL; overrides the gateway's list. Repeat for several.
    #[arg(long = "ice-server", value_delimiter = ',')]
    ice_servers: Vec<String>,

    /// Default log filter; `RUST_LOG` wins when set.
    #[arg(long, env = "HUDDLE_LOG", default_value = "info")]
    log_level: String,

    /// Refuse `/share` instead of offering an empty screen track.
    #[arg(long, default_value_t = false)]
    no_screen_share: bool,
}

/// Drains a remote track and counts RTP packets.
struct RtpCounter {
    peer: ParticipantId,
    kind: TrackKind,
    packets: Arc<AtomicU64>,
    reader: Option<JoinHandle<()>>,
}

impl RtpCounter {
    fn new(peer: &ParticipantId, kind: TrackKind) -> Self {
        Self {
            peer: peer.clone(),
            kind,
            packets: Arc::new(AtomicU64::new(0)),
            reader: None,
        }
    }
}

impl MediaSink<Arc<TrackRemote>> for RtpCounter {
    fn attach(&mut self, track: Arc<TrackRemote>) {
        if let Some(previous) = self.reader.take() {
            previous.abort();
        }
        info!("receiving {} from {}", self.kind, self.peer);
        let packets = self.packets.clone();
        self.reader = Some(tokio::spawn(async move {
            while track.read_rtp().await.is_ok() {
                packets.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    fn release(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        debug!(
            "{} from {} done after {} packets",
            self.kind,
            self.peer,
            self.packets.load(Ordering::Relaxed)
        );
    }
}

struct TerminalSinks;

impl SinkProvider<Arc<TrackRemote>> for TerminalSinks {
    fn sinks_for(&mut self, peer: &ParticipantId) -> PeerSinks<Arc<TrackRemote>> {
        PeerSinks::new(
            Box::new(RtpCounter::new(peer, TrackKind::Audio)),
            Box::new(RtpCounter::new(peer, TrackKind::Video)),
        )
    }
}

fn print_event(event: &RoomEvent) {
    match event {
        RoomEvent::Connected { participant_id } => println!("* connected as {}", participant_id),
        RoomEvent::Joined { room_id, members } => {
            println!("* joined {} ({} already here)", room_id, members.len());
            for member in members {
                println!("  - {}", member);
            }
        }
        RoomEvent::MemberJoined { participant_id } => println!("* {} joined", participant_id),
        RoomEvent::MemberLeft { participant_id } => println!("* {} left", participant_id),
        RoomEvent::Chat {
            from, text, local, ..
        } => {
            let who = if *local { "me".to_string() } else { from.to_string() };
            println!("<{}> {}", who, text);
        }
        RoomEvent::MuteChanged { muted } => {
            println!("* microphone {}", if *muted { "muted" } else { "live" })
        }
        RoomEvent::ScreenShareChanged { sharing } => {
            println!("* screen share {}", if *sharing { "on" } else { "off" })
        }
        RoomEvent::Notice(message) => println!("! {}", message),
        RoomEvent::Disconnected => println!("* disconnected"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    huddle_common::init_tracing_with_default(&args.log_level);

    let room_id = args.room.trim().to_string();
    if !is_valid_room_id(&room_id) {
        anyhow::bail!("invalid room id: {:?}", args.room);
    }

    let mut platform = RtcPlatform::new()?;
    if args.no_screen_share {
        platform = platform.without_screen_capture();
    }

    let channel = signaling::connect(&args.url).await?;

    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel::<RoomEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = ui_rx.recv().await {
            print_event(&event);
        }
    });

    let (command_tx, command_rx) = mpsc::channel::<Command>(32);
    let stdin_tx = command_tx.clone();
    tokio::spawn(async move {
        eprintln!("commands: /mute /share /unshare /quit; anything else is chat");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Some(command) = Command::parse(&line) else {
                continue;
            };
            if stdin_tx.send(command).await.is_err() {
                break;
            }
        }
        let _ = stdin_tx.send(Command::Leave).await;
    });
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = command_tx.send(Command::Leave).await;
        }
    });

    let ice_servers: Vec<IceServer> = args.ice_servers.iter().map(IceServer::stun).collect();
    let orchestrator = Orchestrator::new(
        platform,
        RoomId::new(room_id),
        channel.outbound,
        Box::new(TerminalSinks),
        ui_tx,
    )
    .with_ice_servers(ice_servers);

    // The orchestrator owns the only event sender, so the printer drains
    // everything up to `Disconnected` once `run` returns.
    let result = orchestrator.run(channel.inbound, command_rx).await;
    let _ = printer.await;
    result?;
    Ok(())
}
