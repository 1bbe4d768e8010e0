//! CLI interface for studylink
//!
//! A small operational surface over the core: seed demo data, rank peers,
//! replay a presence scenario, and inspect notification inboxes. The real
//! dashboard drives the same library API.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::aggregator::NotificationAggregator;
use crate::config::Config;
use crate::discovery::Discovery;
use crate::presence::PresenceTracker;
use crate::store::{
    run_migrations, JsonFileStore, KeyedProfileStore, KeyedRelationStore, KeyedStore,
    NotificationStore, ProfileStore, RelationStore,
};
use crate::types::{
    BuddyRelation, Consents, LearningSession, Profile, RelationStatus, SessionStatus, TimeSlot,
};

#[derive(Parser)]
#[command(name = "studylink")]
#[command(about = "Peer matching and presence notifications for StudyLink", long_about = None)]
#[command(version)]
struct Cli {
    /// Path of the keyed data file
    #[arg(long, default_value = "studylink-data.json", global = true)]
    data: PathBuf,

    /// Optional configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a small set of demo learners and buddy relations
    Seed,
    /// Rank study-buddy candidates for a learner
    Discover {
        /// Requesting learner id
        #[arg(long)]
        user: String,
        /// Maximum candidates to show
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Replay a scripted presence scenario through the pipeline
    Simulate,
    /// Show a learner's notification inbox
    Inbox {
        #[arg(long)]
        user: String,
    },
    /// Mark one notification as read
    MarkRead {
        /// Notification id
        #[arg(long)]
        id: Uuid,
    },
}

/// Everything the subcommands need, wired over one keyed store
struct App {
    keyed: Arc<dyn KeyedStore>,
    profiles: Arc<KeyedProfileStore>,
    relations: Arc<KeyedRelationStore>,
    notifications: Arc<NotificationStore>,
    config: Config,
}

impl App {
    async fn open(data: &PathBuf, config_path: Option<&PathBuf>) -> Result<Self> {
        let config = match config_path {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        let keyed: Arc<dyn KeyedStore> = Arc::new(
            JsonFileStore::open(data)
                .await
                .context("failed to open data file")?,
        );
        // schema migration runs exactly once, before any facade reads
        run_migrations(keyed.as_ref()).await?;

        Ok(Self {
            profiles: Arc::new(KeyedProfileStore::new(keyed.clone())),
            relations: Arc::new(KeyedRelationStore::new(keyed.clone())),
            notifications: Arc::new(NotificationStore::new(keyed.clone())),
            keyed,
            config,
        })
    }

    fn aggregator(&self) -> Arc<NotificationAggregator> {
        Arc::new(NotificationAggregator::new(
            self.profiles.clone(),
            self.relations.clone(),
            self.notifications.clone(),
            self.keyed.clone(),
            self.config.clone(),
        ))
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let app = App::open(&cli.data, cli.config.as_ref()).await?;

    match cli.command {
        Commands::Seed => seed(&app).await,
        Commands::Discover { user, limit } => discover(&app, &user, limit).await,
        Commands::Simulate => simulate(&app).await,
        Commands::Inbox { user } => inbox(&app, &user).await,
        Commands::MarkRead { id } => {
            app.notifications.mark_read(id).await?;
            println!("Notification {id} marked as read.");
            Ok(())
        }
    }
}

async fn discover(app: &App, user: &str, limit: Option<usize>) -> Result<()> {
    let discovery = Discovery::new(app.profiles.clone(), app.relations.clone());
    let limit = limit.unwrap_or(app.config.discovery.limit);
    let ranked = discovery.discover(user, limit).await?;

    if ranked.is_empty() {
        println!("No candidates for {user}.");
        return Ok(());
    }
    println!("Top study-buddy candidates for {user}:");
    for candidate in ranked {
        println!(
            "- {} ({}) score {:.3}{}",
            candidate.profile.name,
            candidate.profile.user_id,
            candidate.score,
            if candidate.reasons.is_empty() {
                String::new()
            } else {
                format!(" [{}]", candidate.reasons.join(", "))
            }
        );
    }
    Ok(())
}

async fn inbox(app: &App, user: &str) -> Result<()> {
    let notifications = app.notifications.list_by_user(user).await?;
    let unread = app.notifications.count_unread(user).await?;
    println!("{} notifications ({unread} unread):", notifications.len());
    for n in notifications {
        println!(
            "- [{}] {:?} from {:?}{} ({})",
            if n.is_read { "read" } else { "new" },
            n.kind,
            n.source_user_ids,
            n.session_id
                .as_deref()
                .map(|s| format!(" in {s}"))
                .unwrap_or_default(),
            n.id
        );
    }
    Ok(())
}

/// Schedule one session, replay a pair of buddy joins through the
/// tracker, and let the aggregator consume the emitted events.
async fn simulate(app: &App) -> Result<()> {
    let (tracker, mut events) = PresenceTracker::new(app.relations.clone());
    let aggregator = app.aggregator();

    tracker
        .schedule(LearningSession {
            id: "demo-session".to_string(),
            course_id: "gauss".to_string(),
            status: SessionStatus::Scheduled,
            starts_at: Utc::now() - Duration::minutes(1),
            capacity: Some(8),
            participants: vec![],
        })
        .await?;

    tracker.join("demo-session", "lea").await?;
    tracker.join("demo-session", "marc").await?;
    tracker.leave("demo-session", "marc").await?;

    while let Ok(event) = events.try_recv() {
        aggregator.handle_presence(&event).await?;
    }

    let session = tracker.get("demo-session").await?;
    println!(
        "Session {} is {} with {} active participant(s).",
        session.id,
        session.status,
        session.active_count()
    );
    println!("Run `studylink inbox --user camille` to see the result.");
    Ok(())
}

async fn seed(app: &App) -> Result<()> {
    let now = Utc::now();
    let learners = [
        demo_profile("camille", "Camille Roy", &["gauss", "integrales", "mecanique"], 2000, 10, 85, now),
        demo_profile("lea", "Léa Fontaine", &["gauss", "integrales"], 1900, 9, 90, now),
        demo_profile("marc", "Marc Dubois", &["gauss", "optique"], 2400, 12, 70, now),
        demo_profile("nadia", "Nadia Benali", &["integrales", "mecanique"], 800, 5, 60, now),
        demo_profile("theo", "Théo Lambert", &["optique"], 3100, 15, 40, now),
    ];
    for profile in learners {
        app.profiles.put(profile).await?;
    }

    // camille watches léa and marc; léa watches camille back
    for (observer, buddy) in [("camille", "lea"), ("camille", "marc"), ("lea", "camille")] {
        app.relations
            .put(BuddyRelation {
                user_id: observer.to_string(),
                buddy_id: buddy.to_string(),
                status: RelationStatus::Accepted,
                consents: Consents::default(),
                created_at: now,
                accepted_at: Some(now),
            })
            .await?;
    }

    println!("Seeded 5 learners and 3 buddy relations.");
    Ok(())
}

fn demo_profile(
    user_id: &str,
    name: &str,
    courses: &[&str],
    total_xp: u32,
    level: u32,
    responsiveness: u8,
    now: chrono::DateTime<Utc>,
) -> Profile {
    Profile {
        user_id: user_id.to_string(),
        name: name.to_string(),
        faculty: "Sciences".to_string(),
        courses: courses.iter().map(|c| c.to_string()).collect(),
        completed_lessons: courses
            .iter()
            .enumerate()
            .map(|(i, c)| (c.to_string(), (i as u32 + 1) * 4))
            .collect(),
        total_xp,
        level,
        badges: ["early-bird".to_string()].into_iter().collect(),
        last_activity_at: now - Duration::hours(6),
        session_participations: 4,
        session_creations: 1,
        avg_session_minutes: 45.0,
        preferred_time_slots: [TimeSlot::Evening, TimeSlot::Night].into_iter().collect(),
        existing_buddies: Default::default(),
        responsiveness,
        helpfulness: 75,
        archived: false,
    }
}
