//! Seeded marketplace chat simulation.
//!
//! Plays a buyer's session against the in-process server: sellers write in,
//! the buyer replies, the network drops, conversations open and close, and
//! the account switches. Runs on a paused clock, so hours of simulated
//! traffic finish instantly and the same seed always replays the same run.
//! The standard invariants are checked after every step.
//!
//! # Usage
//!
//! ```bash
//! souk-sim --seed 7 --steps 500
//!
//! # Follow the service's own decisions
//! RUST_LOG=souk_client=debug souk-sim --seed 7
//! ```

use std::{error::Error, time::Duration};

use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use souk_core::{ChatMessage, ConnectionState, Environment, SyncConfig, UserId};
use souk_harness::{InvariantRegistry, SimCoordinator, SimWorld, session, wire};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const BUYERS: [&str; 2] = ["buyer-1", "buyer-2"];
const SELLERS: [&str; 4] = ["seller-7", "seller-8", "seller-9", "seller-70"];

/// Souk chat simulation
#[derive(Parser, Debug)]
#[command(name = "souk-sim")]
#[command(about = "Replay a seeded marketplace chat session on a virtual clock")]
#[command(version)]
struct Args {
    /// Seed for the environment and step selection
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Number of simulated steps
    #[arg(long, default_value = "300")]
    steps: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Default)]
struct Tally {
    received: u32,
    sent: u32,
    send_failures: u32,
    drops: u32,
    manual_reconnects: u32,
    switches: u32,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    SellerWrites(usize),
    SellerNotifies(usize),
    BuyerReplies(usize),
    Typing(usize),
    OpenConversation(usize),
    CloseConversation,
    MarkRead(usize),
    OlderHistory(usize),
    Drop { failing_connects: u32 },
    Idle(u64),
    SwitchAccount,
}

fn pick(rng: &mut ChaCha8Rng) -> Step {
    let seller = rng.gen_range(0..SELLERS.len());
    match rng.gen_range(0..100) {
        0..20 => Step::SellerWrites(seller),
        20..30 => Step::SellerNotifies(seller),
        30..45 => Step::BuyerReplies(seller),
        45..52 => Step::Typing(seller),
        52..58 => Step::OpenConversation(seller),
        58..62 => Step::CloseConversation,
        62..68 => Step::MarkRead(seller),
        68..72 => Step::OlderHistory(seller),
        72..80 => Step::Drop { failing_connects: rng.gen_range(0..7) },
        80..98 => Step::Idle(rng.gen_range(50..40_000)),
        _ => Step::SwitchAccount,
    }
}

struct Simulation {
    world: SimWorld,
    coordinator: SimCoordinator,
    invariants: InvariantRegistry,
    rng: ChaCha8Rng,
    buyer: usize,
    next_server_id: u64,
    tally: Tally,
}

impl Simulation {
    fn new(seed: u64) -> Result<Self, Box<dyn Error>> {
        let world = SimWorld::new(seed);
        let coordinator = world.coordinator(SyncConfig::default())?;
        Ok(Self {
            world,
            coordinator,
            invariants: InvariantRegistry::standard(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            buyer: 0,
            next_server_id: 1,
            tally: Tally::default(),
        })
    }

    fn me(&self) -> &'static str {
        BUYERS[self.buyer]
    }

    async fn log_in(&mut self) -> Result<(), Box<dyn Error>> {
        let me = self.me();
        self.coordinator.apply(Some(session(me, &format!("tok-{me}"))?)).await?;
        Ok(())
    }

    /// The server accepts a message: it lands in history before any event.
    fn server_accepts(&mut self, from: &str, to: &str, content: &str) -> u64 {
        let id = self.next_server_id;
        self.next_server_id += 1;
        let at = self.world.env.wall_clock();
        self.world.history.record(ChatMessage::confirmed(
            id.to_string(),
            UserId::new(from),
            UserId::new(to),
            content,
            at,
        ));
        id
    }

    async fn step(&mut self, step: Step) -> Result<(), Box<dyn Error>> {
        let me = self.me();
        let at = self.world.env.wall_clock();

        match step {
            Step::SellerWrites(seller) => {
                let seller = SELLERS[seller];
                let id = self.server_accepts(seller, me, "is it still available?");
                let payload = if id % 2 == 0 {
                    wire::message(id, seller, me, "is it still available?", at)
                } else {
                    wire::message_pascal(id, seller, me, "is it still available?", at)
                };
                self.world.transport.emit("ReceiveMessage", vec![payload]);
                self.tally.received += 1;
            },
            Step::SellerNotifies(seller) => {
                let seller = SELLERS[seller];
                let id = self.server_accepts(seller, me, "new offer");
                let notice = wire::notice(Some(id), seller, "Seller", "new offer", None);
                self.world.transport.emit("NewMessageNotification", vec![notice]);
                // The push copy usually arrives too
                if self.rng.gen_bool(0.5) {
                    let copy = wire::message(id, seller, me, "new offer", at);
                    self.world.transport.emit("ReceiveMessage", vec![copy]);
                }
                self.tally.received += 1;
            },
            Step::BuyerReplies(seller) => self.reply(SELLERS[seller]).await,
            Step::Typing(seller) => {
                let seller = SELLERS[seller];
                self.world.transport.emit("UserStartedTyping", vec![wire::user(seller)]);
                let partner = UserId::new(seller);
                self.coordinator.service().start_typing(&partner).await;
                self.coordinator.service().stop_typing(&partner).await;
                self.world.transport.emit("UserStoppedTyping", vec![wire::user(seller)]);
            },
            Step::OpenConversation(seller) => {
                let key = format!("listing-{}_{}", self.rng.gen_range(1..50), SELLERS[seller]);
                self.coordinator.service().set_active_conversation(Some(key));
            },
            Step::CloseConversation => self.coordinator.service().set_active_conversation(None),
            Step::MarkRead(seller) => {
                let seller = UserId::new(SELLERS[seller]);
                self.coordinator.service_mut().mark_messages_as_read(&seller).await;
            },
            Step::OlderHistory(seller) => {
                let seller = UserId::new(SELLERS[seller]);
                if let Err(err) = self.coordinator.service_mut().load_history(&seller, 2).await {
                    tracing::warn!(error = %err, "older history unavailable");
                }
            },
            Step::Drop { failing_connects } => {
                self.world.transport.fail_next_connects(failing_connects);
                self.world.transport.drop_connection("cell handover");
                self.tally.drops += 1;
            },
            Step::Idle(millis) => tokio::time::advance(Duration::from_millis(millis)).await,
            Step::SwitchAccount => {
                self.buyer = (self.buyer + 1) % BUYERS.len();
                self.log_in().await?;
                self.tally.switches += 1;
            },
        }

        self.coordinator.service_mut().process_pending().await;

        if self.coordinator.service().state() == ConnectionState::Failed {
            // Pull to refresh
            self.world.transport.fail_next_connects(0);
            self.coordinator.service_mut().reconnect().await?;
            self.tally.manual_reconnects += 1;
        }
        Ok(())
    }

    async fn reply(&mut self, seller: &'static str) {
        let me = self.me();
        let partner = UserId::new(seller);
        let rejected = self.rng.gen_ratio(1, 10);
        if rejected {
            self.world.transport.reject("SendMessage", "rate limited");
        } else if self.coordinator.service().state() == ConnectionState::Connected {
            self.server_accepts(me, seller, "yes, still available");
        }

        let service = self.coordinator.service_mut();
        match service.send_message_optimistic(&partner, "yes, still available").await {
            Ok(()) => self.tally.sent += 1,
            Err(err) => {
                tracing::info!(error = %err, "send failed");
                self.tally.send_failures += 1;
            },
        }
        if rejected {
            self.world.transport.accept("SendMessage");
        }
    }

    fn check(&self, context: &str) -> Result<(), Box<dyn Error>> {
        let snapshot = self.world.snapshot(self.coordinator.service());
        self.invariants.check_all(&snapshot).map_err(|violations| {
            for violation in &violations {
                tracing::error!(%violation, context, "invariant violated");
            }
            Box::<dyn Error>::from(format!("{} violation(s) {context}", violations.len()))
        })
    }
}

async fn simulate(args: &Args) -> Result<Tally, Box<dyn Error>> {
    let mut sim = Simulation::new(args.seed)?;
    sim.log_in().await?;
    sim.check("after login")?;

    for index in 0..args.steps {
        let step = pick(&mut sim.rng);
        tracing::debug!(index, ?step, "step");
        sim.step(step).await?;
        sim.check(&format!("after step {index} ({step:?})"))?;
    }

    sim.coordinator.apply(None).await?;
    sim.check("after logout")?;

    tracing::info!(
        elapsed = ?sim.world.env.elapsed(),
        connects = sim.world.transport.connect_count(),
        presented = sim.world.presenter.presented().len(),
        "session replayed"
    );
    Ok(sim.tally)
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(seed = args.seed, steps = args.steps, "souk simulation starting");

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_time().start_paused(true).build()?;
    let tally = runtime.block_on(simulate(&args))?;

    tracing::info!(
        received = tally.received,
        sent = tally.sent,
        send_failures = tally.send_failures,
        drops = tally.drops,
        manual_reconnects = tally.manual_reconnects,
        switches = tally.switches,
        "simulation finished"
    );
    Ok(())
}
