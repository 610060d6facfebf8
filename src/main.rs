//! Nucleus Cache Workload
//!
//! Drives concurrent sessions over a shared Level-2 cache and reports how
//! the cache behaved.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Session 1   Session 2   ...   Session N   (blocking tasks)     │
//! │      │           │                 │                            │
//! │      └───────────┴────────┬────────┘                            │
//! │                           ▼                                     │
//! │                 Shared Level-2 cache ──▶ In-memory datastore    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nucleus_cache::adapters::{Datastore, InMemoryDatastore, ManagedObject, Session};
use nucleus_cache::cache::{create_level2_cache, MemoryPressure, PrometheusExporter};
use nucleus_cache::domain::{
    ClassMeta, Container, ContainerMeta, FieldMeta, Identity, RelationType, Role, Scalar, Value,
};
use nucleus_cache::{CacheConfig, Level2Cache, Level2CacheType};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Nucleus Cache - concurrent Level-2 cache workload
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML cache configuration (flags below override it)
    #[arg(long, env = "NUCLEUS_CONFIG")]
    config: Option<PathBuf>,

    /// Level-2 cache type (none, soft, weak, strong, provider)
    #[arg(long, env = "NUCLEUS_L2_TYPE")]
    cache_type: Option<Level2CacheType>,

    /// Maximum number of cached objects
    #[arg(long, env = "NUCLEUS_MAX_SIZE")]
    max_size: Option<usize>,

    /// Pin every object of this class (Owner or Pet), including subclasses
    #[arg(long, env = "NUCLEUS_PIN_CLASS")]
    pin_class: Option<String>,

    /// Concurrent sessions
    #[arg(long, env = "NUCLEUS_SESSIONS", default_value = "4")]
    sessions: usize,

    /// Owners in the datastore (each with two pets)
    #[arg(long, env = "NUCLEUS_OBJECTS", default_value = "200")]
    objects: usize,

    /// Passes each session makes over the owners
    #[arg(long, env = "NUCLEUS_ROUNDS", default_value = "3")]
    rounds: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Model
// =============================================================================

#[derive(Clone)]
struct Model {
    owner: Arc<ClassMeta>,
    address: Arc<ClassMeta>,
    pet: Arc<ClassMeta>,
}

impl Model {
    fn new() -> Self {
        let address = ClassMeta::builder("Address")
            .field(FieldMeta::new("street"))
            .field(FieldMeta::new("city"))
            .build();
        let pet = ClassMeta::builder("Pet")
            .field(FieldMeta::new("name"))
            .field(FieldMeta::new("species"))
            .build();
        let owner = ClassMeta::builder("Owner")
            .field(FieldMeta::new("email"))
            .field(FieldMeta::new("visits"))
            .field(FieldMeta::new("password").not_cacheable())
            .field(
                FieldMeta::new("home")
                    .relation(RelationType::OneToOneUni, "Address")
                    .embedded(),
            )
            .field(FieldMeta::new("pets").container(ContainerMeta::list(Role::Reference)))
            .field(FieldMeta::new("favourite").relation(RelationType::ManyToOneUni, "Pet"))
            .unique(["email"])
            .build();
        Self {
            owner,
            address,
            pet,
        }
    }

    fn class(&self, name: &str) -> Option<&Arc<ClassMeta>> {
        [&self.owner, &self.address, &self.pet]
            .into_iter()
            .find(|c| c.name() == name)
    }
}

fn owner_id(n: usize) -> Identity {
    Identity::datastore("Owner", n as i64)
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = build_config(&args)?;
    info!("Starting Nucleus Cache workload");
    info!("  Level2 cache: {}", config.level2_type);
    info!("  Max size: {:?}", config.max_size);
    info!("  Sessions: {}, owners: {}, rounds: {}", args.sessions, args.objects, args.rounds);

    let model = Model::new();
    let level2 = create_level2_cache(&config).context("creating level2 cache")?;
    let datastore = Arc::new(InMemoryDatastore::new());

    if let Some(name) = &args.pin_class {
        match model.class(name) {
            Some(class) => level2.pin_all_of_class(class, true),
            None => warn!("Unknown class '{}', nothing pinned", name),
        }
    }

    seed(&config, &model, &level2, &datastore, args.objects)?;

    let mut handles = Vec::with_capacity(args.sessions);
    for worker in 0..args.sessions {
        let config = config.clone();
        let level2 = Arc::clone(&level2);
        let datastore: Arc<dyn Datastore> = datastore.clone();
        let objects = args.objects;
        let rounds = args.rounds;
        handles.push(tokio::task::spawn_blocking(move || {
            run_session(worker, config, level2, datastore, objects, rounds)
        }));
    }

    let mut reads = 0;
    for handle in handles {
        reads += handle.await.context("session task panicked")??;
    }

    let reclaimed = level2.reclaim(MemoryPressure::High);
    report(&level2, &datastore, reads, reclaimed)?;

    level2.close();
    info!("Workload complete");
    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(cache_type) = args.cache_type {
        config.level2_type = cache_type;
    }
    if args.max_size.is_some() {
        config.max_size = args.max_size;
    }
    config.validate()?;
    Ok(config)
}

// =============================================================================
// Workload
// =============================================================================

fn seed(
    config: &CacheConfig,
    model: &Model,
    level2: &Arc<dyn Level2Cache>,
    datastore: &Arc<InMemoryDatastore>,
    objects: usize,
) -> anyhow::Result<()> {
    let session = Session::new(config.clone(), Arc::clone(level2), datastore.clone());

    for n in 0..objects {
        let pets: Vec<Arc<ManagedObject>> = (0..2)
            .map(|p| {
                ManagedObject::builder(&model.pet)
                    .id(Identity::datastore("Pet", (n * 2 + p) as i64))
                    .set("name", format!("pet-{}-{}", n, p))
                    .set("species", if p == 0 { "cat" } else { "dog" })
                    .build()
            })
            .collect();
        for pet in &pets {
            session.persist(pet.clone())?;
        }

        let home = ManagedObject::builder(&model.address)
            .set("street", format!("{} Main St", n))
            .set("city", "Springfield")
            .build();
        let owner = ManagedObject::builder(&model.owner)
            .id(owner_id(n))
            .set("email", format!("owner{}@example.org", n))
            .set("visits", 0i64)
            .set("password", "hunter2")
            .object("home", home)
            .value(
                "pets",
                Value::Container(Container::List(
                    pets.iter().map(|p| Value::Object(p.clone())).collect(),
                )),
            )
            .object("favourite", pets[0].clone())
            .build();
        session.persist(owner)?;
    }

    let flushed = session.commit()?;
    session.close();
    info!("Seeded {} objects", flushed);
    Ok(())
}

/// One session's passes over the owners; returns the number of finds
fn run_session(
    worker: usize,
    config: CacheConfig,
    level2: Arc<dyn Level2Cache>,
    datastore: Arc<dyn Datastore>,
    objects: usize,
    rounds: usize,
) -> nucleus_cache::Result<usize> {
    let mut reads = 0;
    for round in 0..rounds {
        let session = Session::new(config.clone(), Arc::clone(&level2), Arc::clone(&datastore));
        for i in 0..objects {
            let n = (i * (worker + 1) + round) % objects.max(1);
            let owner = session.find(&owner_id(n))?;
            reads += 1;

            if (i + worker) % 10 == 0 {
                let visits = match owner.field_by_name("visits") {
                    Some(Value::Scalar(Scalar::Long(n))) => n,
                    _ => 0,
                };
                owner.set_field_by_name("visits", Value::from(visits + 1));
            }
        }
        session.commit()?;
        session.close();
    }
    info!("Worker {} finished {} finds", worker, reads);
    Ok(reads)
}

fn report(
    level2: &Arc<dyn Level2Cache>,
    datastore: &InMemoryDatastore,
    reads: usize,
    reclaimed: usize,
) -> anyhow::Result<()> {
    let stats = level2.stats();
    info!("Finds: {}", reads);
    info!(
        "Level2: {} objects ({} pinned), hit ratio {:.1}%",
        level2.size(),
        level2.number_of_pinned_objects(),
        stats.hit_ratio * 100.0
    );
    info!(
        "Level2: {} puts, {} rejected, {} evictions, {} reclaimed at shutdown",
        stats.puts, stats.rejected_puts, stats.evictions, reclaimed
    );
    info!(
        "Datastore: {} rows, {} loads, {} stores",
        datastore.len(),
        datastore.loads(),
        datastore.stores()
    );

    let exporter = PrometheusExporter::new()?;
    exporter.observe(
        "level2",
        &stats,
        level2.number_of_pinned_objects(),
        level2.number_of_unpinned_objects(),
    );
    println!("{}", exporter.render()?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
