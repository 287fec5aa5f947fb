use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::de::DeserializeOwned;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use talent_scout::api::{ErrorResponse, HealthResponse, SubmitJobResponse};
use talent_scout::candidate::MessageKind;
use talent_scout::collaborators::fixture::FixtureCollaborators;
use talent_scout::collaborators::SearchMethod;
use talent_scout::config::PipelineConfig;
use talent_scout::node::Node;
use talent_scout::scheduler::{JobInput, JobOptions, JobResult, JobStatusView, Priority};
use talent_scout::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "talent-scout")]
#[command(version)]
#[command(about = "Candidate sourcing pipeline: search, extract, score, and draft outreach")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the pipeline server
    Server(ServerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Show queue depth and worker count
    Health {
        #[command(flatten)]
        client: ClientArgs,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port for the HTTP API
    #[arg(long, default_value = "8080", env = "SCOUT_PORT")]
    port: u16,

    /// JSON fixture backing the search, extract, score, and outreach stages
    #[arg(long, env = "SCOUT_FIXTURE")]
    fixture: PathBuf,

    /// Number of concurrent workers
    #[arg(long, default_value = "8", env = "SCOUT_WORKERS")]
    workers: usize,

    /// Concurrent candidate sub-steps per job
    #[arg(long, env = "SCOUT_FAN_OUT")]
    fan_out: Option<usize>,

    /// Fraction of candidates per stage allowed to fail
    #[arg(long, default_value = "0.5", env = "SCOUT_FAILURE_TOLERANCE")]
    failure_tolerance: f64,

    /// Directory for the candidate cache (in memory when omitted)
    #[arg(long, env = "SCOUT_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Directory for job-state records (in memory when omitted)
    #[arg(long, env = "SCOUT_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Task queue journal file
    #[arg(long, env = "SCOUT_QUEUE_JOURNAL")]
    queue_journal: Option<PathBuf>,

    /// Cache freshness window in days
    #[arg(long, default_value = "7")]
    freshness_days: u64,

    /// Retention for finished jobs in hours
    #[arg(long, default_value = "24")]
    job_ttl_hours: u64,

    /// Upper bound for a single collaborator call in seconds
    #[arg(long, default_value = "600")]
    stage_timeout_secs: u64,

    /// Skip outreach unless a job asks for it
    #[arg(long)]
    no_outreach: bool,
}

impl ServerArgs {
    fn into_config(self) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
        let addr: SocketAddr = format!("0.0.0.0:{}", self.port).parse()?;
        let mut config = PipelineConfig::default()
            .with_workers(self.workers)
            .with_fan_out(self.fan_out.unwrap_or(self.workers))
            .with_failure_tolerance(self.failure_tolerance)
            .with_outreach(!self.no_outreach)
            .with_freshness_window(seconds(self.freshness_days, 24 * 60 * 60, "freshness-days")?)
            .with_api_addr(addr);
        config.cache.directory = self.cache_dir;
        config.retention.directory = self.state_dir;
        config.retention.job_ttl = seconds(self.job_ttl_hours, 60 * 60, "job-ttl-hours")?;
        config.queue.journal_path = self.queue_journal;
        config.worker.stage_timeout = Duration::from_secs(self.stage_timeout_secs);
        config.validate()?;
        Ok(config)
    }
}

/// `count` units of `unit_secs` each, rejecting values that overflow.
fn seconds(count: u64, unit_secs: u64, flag: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    count
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("--{flag} {count} is out of range").into())
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8080", env = "SCOUT_ADDR")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PriorityArg {
    Low,
    Normal,
    High,
}

impl From<PriorityArg> for Priority {
    fn from(p: PriorityArg) -> Self {
        match p {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MessageKindArg {
    ConnectionRequest,
    Inmail,
    FollowUp,
}

impl From<MessageKindArg> for MessageKind {
    fn from(k: MessageKindArg) -> Self {
        match k {
            MessageKindArg::ConnectionRequest => MessageKind::ConnectionRequest,
            MessageKindArg::Inmail => MessageKind::Inmail,
            MessageKindArg::FollowUp => MessageKind::FollowUp,
        }
    }
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a sourcing job
    Submit {
        /// Job description to source candidates for
        description: String,

        /// Search method (rapid_api, google_crawler, playwright, playwright_two_phase, or a custom provider)
        #[arg(long, short = 'm', default_value = "rapid_api")]
        method: SearchMethod,

        /// Maximum number of candidates
        #[arg(long, short = 'n', default_value = "5")]
        limit: usize,

        #[arg(long, default_value = "normal")]
        priority: PriorityArg,

        #[arg(long, default_value = "connection-request")]
        message_kind: MessageKindArg,

        /// Skip outreach for this job
        #[arg(long)]
        no_outreach: bool,
    },
    /// Get status and partial results of a job
    Status { job_id: Uuid },
    /// Get the final results of a completed job
    Result { job_id: Uuid },
    /// Cancel a pending or running job
    Cancel { job_id: Uuid },
    /// List all jobs
    List,
}

// =============================================================================
// HTTP Client
// =============================================================================

struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    fn new(addr: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: addr.trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Box<dyn std::error::Error>> {
        let response = self.http.get(format!("{}{}", self.base, path)).send().await?;
        Self::decode(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&JobInput>,
    ) -> Result<T, Box<dyn std::error::Error>> {
        let mut request = self.http.post(format!("{}{}", self.base, path));
        if let Some(body) = body {
            request = request.json(body);
        }
        Self::decode(request.send().await?).await
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, Box<dyn std::error::Error>> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        Err(format!("request failed ({status}): {message}").into())
    }
}

// =============================================================================
// Output
// =============================================================================

fn print_status(view: &JobStatusView) {
    println!("Job ID:      {}", view.id);
    println!("Status:      {}", view.status);
    println!("Stage:       {}", view.stage);
    println!("Progress:    {}%", view.progress);
    println!("Method:      {}", view.method);
    println!("Attempts:    {}", view.attempts);
    println!("Discovered:  {}", view.discovered);
    if let Some(error) = &view.error {
        println!("Error:       {error}");
    }
    if !view.results.is_empty() {
        println!("Results so far: {}", view.results.len());
    }
    if !view.failures.is_empty() {
        println!("Failed candidates:");
        for failure in &view.failures {
            println!("  [{}] {}: {}", failure.stage, failure.profile_url, failure.reason);
        }
    }
}

fn print_result(result: &JobResult) {
    println!(
        "{:<28} {:<24} {:>7}  {:<14} OUTREACH",
        "CANDIDATE", "NAME", "SCORE", "RECOMMENDATION"
    );
    println!("{}", "-".repeat(88));
    for entry in &result.results {
        let outreach = match entry.outreach() {
            Some(o) if o.fallback => "fallback",
            Some(_) => "drafted",
            None => "-",
        };
        println!(
            "{:<28} {:<24} {:>7.2}  {:<14} {}",
            truncate(entry.record.id.as_str(), 28),
            truncate(&entry.record.attributes.name, 24),
            entry.score.aggregate,
            entry.score.recommendation.to_string(),
            outreach
        );
    }
    if let Some(summary) = &result.summary {
        println!();
        println!(
            "{} candidates, {} scored, {} passed ({:.0}%), {} failed extraction, {} failed scoring",
            summary.total_candidates,
            summary.scored,
            summary.passed,
            summary.pass_rate * 100.0,
            summary.failed_extractions,
            summary.failed_scoring
        );
    }
}

fn print_list(jobs: &[JobStatusView]) {
    println!(
        "{:<36}  {:<10} {:<20} {:>8}  DESCRIPTION",
        "JOB ID", "STATUS", "STAGE", "PROGRESS"
    );
    println!("{}", "-".repeat(100));
    for job in jobs {
        println!(
            "{:<36}  {:<10} {:<20} {:>7}%  {}",
            job.id,
            job.status.to_string(),
            job.stage.to_string(),
            job.progress,
            truncate(&job.description, 40)
        );
    }
    println!();
    println!("Total: {} jobs", jobs.len());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let fixture = FixtureCollaborators::from_file(&args.fixture).await?;
    let config = args.into_config()?;
    tracing::info!(
        workers = config.worker.concurrency,
        fan_out = config.fan_out,
        failure_tolerance = config.failure_tolerance,
        outreach = config.outreach_enabled,
        "Starting talent-scout"
    );

    let node = Node::new(config, fixture.into_collaborators()).await?;
    let shutdown = install_shutdown_handler()?;
    node.run(shutdown).await?;
    Ok(())
}

async fn handle_job(
    client: &ClientArgs,
    command: JobCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let api = ApiClient::new(&client.addr);
    let json = matches!(client.output, OutputFormat::Json);

    match command {
        JobCommands::Submit {
            description,
            method,
            limit,
            priority,
            message_kind,
            no_outreach,
        } => {
            let input = JobInput::new(description, method, limit).with_options(JobOptions {
                outreach: no_outreach.then_some(false),
                outreach_kind: message_kind.into(),
                priority: priority.into(),
            });
            let response: SubmitJobResponse = api.post("/api/jobs", Some(&input)).await?;
            if json {
                print_json(&response)?;
            } else {
                println!("Job submitted successfully");
                println!("Job ID: {}", response.job_id);
            }
        }
        JobCommands::Status { job_id } => {
            let view: JobStatusView = api.get(&format!("/api/jobs/{job_id}")).await?;
            if json {
                print_json(&view)?;
            } else {
                print_status(&view);
            }
        }
        JobCommands::Result { job_id } => {
            let result: JobResult = api.get(&format!("/api/jobs/{job_id}/result")).await?;
            if json {
                print_json(&result)?;
            } else {
                print_result(&result);
            }
        }
        JobCommands::Cancel { job_id } => {
            let view: JobStatusView = api.post(&format!("/api/jobs/{job_id}/cancel"), None).await?;
            if json {
                print_json(&view)?;
            } else {
                print_status(&view);
            }
        }
        JobCommands::List => {
            let jobs: Vec<JobStatusView> = api.get("/api/jobs").await?;
            if json {
                print_json(&jobs)?;
            } else {
                print_list(&jobs);
            }
        }
    }
    Ok(())
}

async fn handle_health(client: &ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let health: HealthResponse = ApiClient::new(&client.addr).get("/api/health").await?;
    match client.output {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Table => {
            println!("Status:        {}", health.status);
            println!("Workers:       {}", health.workers);
            println!("Jobs:          {}", health.jobs);
            println!("Queue ready:   {}", health.queue.ready);
            println!("Queue leased:  {}", health.queue.leased);
            println!("Dead letters:  {}", health.queue.dead_letters);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Job { client, command } => handle_job(&client, command).await?,
        Commands::Health { client } => handle_health(&client).await?,
    }

    Ok(())
}
