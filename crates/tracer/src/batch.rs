//! `tracer batch`: trace one target over a corpus of input files.
//!
//! Every file under the input directory becomes one job. A job runs
//! `tracer run --forward-exit-status` as a child process, with the input's
//! path substituted into the target command (or fed on stdin), and writes its
//! streams to the same relative location under the output directories:
//!
//! ```text
//! corpus/a/seed.bin  ->  traces/a/seed.bin  (+ symbols/a/seed.bin)
//! ```
//!
//! Jobs run on a tokio runtime, at most `--workers` at a time. When all jobs
//! are done the inputs are reported grouped by how their job ended.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::Args;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracer_utils::logging::LOG_FILE_ENV;
use tracer_utils::{debug, error, info, warn, worker_log_paths};

/// Replaced by the input file's path in the target command.
pub const FILE_PLACEHOLDER: &str = "_@_FILE_@_";

const FALLBACK_WORKERS: usize = 2;
const FALLBACK_POLL_SECS: u64 = 5;

/// Exit status of `tracer batch` when the batch cannot be set up.
const SETUP_FAILED: i32 = 2;

/// Options of the `batch` subcommand
#[derive(Args, Debug)]
pub struct BatchArgs
{
    /// Directory searched recursively for input files
    #[arg(long)]
    pub input_dir: PathBuf,

    /// Directory receiving one data file per input
    #[arg(long)]
    pub data_dir: PathBuf,

    /// Directory receiving one symbol file per input
    #[arg(long)]
    pub symbols_dir: Option<PathBuf>,

    /// Trace granularity forwarded to every job
    #[arg(short = 'g', long, default_value = "bbl")]
    pub granularity: String,

    /// Blocked-name list forwarded to every job
    #[arg(short = 'b', long, default_value = "")]
    pub blocked: String,

    /// Write only routine names in the symbol files
    #[arg(long, default_value_t = false)]
    pub bare_symbols: bool,

    /// Feed each input file to the target's stdin
    #[arg(long, default_value_t = false)]
    pub stdin: bool,

    /// Jobs running at the same time
    #[arg(short = 'j', long, default_value_t = FALLBACK_WORKERS)]
    pub workers: usize,

    /// Seconds between progress reports
    #[arg(long, default_value_t = FALLBACK_POLL_SECS)]
    pub poll_secs: u64,

    /// Kill a job after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Capture each job's stdout and stderr and log them at debug level
    #[arg(long, default_value_t = false)]
    pub dump_output: bool,

    /// Directory for one tracer log file per worker
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Target program and its arguments; `_@_FILE_@_` marks the input path
    #[arg(last = true, required = true)]
    pub target: Vec<String>,
}

/// Failures that stop a batch before any job runs
#[derive(Error, Debug)]
pub enum BatchError
{
    /// The input directory could not be walked
    #[error("cannot read input directory {}: {source}", path.display())]
    InputDir
    {
        /// Directory that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The input directory holds no files
    #[error("no input files under {}", .0.display())]
    NoInputs(PathBuf),

    /// An output directory could not be created
    #[error("cannot create output directory {}: {source}", path.display())]
    OutputDir
    {
        /// Directory that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The target command has no placeholder and `--stdin` is off
    #[error("the target never sees the input: add {FILE_PLACEHOLDER} to its arguments or pass --stdin")]
    NowhereToPassInput,

    /// No target program was given
    #[error("no target program given")]
    MissingTarget,

    /// The path of the running tracer is unknown
    #[error("cannot locate the tracer executable: {0}")]
    CurrentExe(#[source] io::Error),

    /// The async runtime could not start
    #[error("cannot start the async runtime: {0}")]
    Runtime(#[source] io::Error),
}

/// How one job ended.
///
/// Ordered so that timeouts come first in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobStatus
{
    /// Killed after `--timeout` seconds.
    Timeout,
    /// Exit status of `tracer run`, which forwards the target's.
    Code(i32),
    /// The job could not be started or awaited.
    Failed,
}

impl fmt::Display for JobStatus
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Code(code) => write!(f, "code-{code}"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One input file and where its traces go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job
{
    /// Position in the sorted input list.
    pub index: usize,
    pub input: PathBuf,
    pub data: PathBuf,
    pub symbols: Option<PathBuf>,
}

/// The command every job runs, minus the per-input parts.
#[derive(Debug, Clone)]
struct JobTemplate
{
    tracer: PathBuf,
    granularity: String,
    blocked: String,
    bare_symbols: bool,
    program: String,
    args: Vec<String>,
    stdin: bool,
    dump_output: bool,
    timeout: Option<Duration>,
    log_files: Vec<PathBuf>,
}

/// Inputs grouped by how their job ended
#[derive(Debug, Clone, Default)]
pub struct BatchReport
{
    groups: BTreeMap<JobStatus, Vec<usize>>,
    total: usize,
}

impl BatchReport
{
    pub fn record(&mut self, index: usize, status: JobStatus)
    {
        self.groups.entry(status).or_default().push(index);
        self.total += 1;
    }

    #[must_use]
    pub fn total(&self) -> usize
    {
        self.total
    }

    /// Job indices that ended with `status`, in input order.
    #[must_use]
    pub fn jobs(&self, status: JobStatus) -> Vec<usize>
    {
        let mut jobs = self.groups.get(&status).cloned().unwrap_or_default();
        jobs.sort_unstable();
        jobs
    }

    /// `total N [timeout=T, code-0=n, ...]`
    #[must_use]
    pub fn summary_line(&self) -> String
    {
        let timeouts = self.groups.get(&JobStatus::Timeout).map_or(0, Vec::len);
        let mut line = format!("total {} [timeout={timeouts}", self.total);
        for (status, jobs) in &self.groups {
            if *status != JobStatus::Timeout {
                line.push_str(&format!(", {status}={}", jobs.len()));
            }
        }
        line.push(']');
        line
    }

    fn log(&self, jobs: &[Job])
    {
        for status in self.groups.keys() {
            let listing: Vec<String> = self
                .jobs(*status)
                .into_iter()
                .map(|index| format!("Job{index} <= {}", jobs[index].input.display()))
                .collect();
            info!("Input of {status}:\n{}", listing.join("\n"));
        }
        info!("Report: {}", self.summary_line());
    }
}

/// Run a batch and return the process exit status.
pub fn execute(args: BatchArgs) -> i32
{
    match run_batch(args) {
        Ok(report) => {
            println!("{}", report.summary_line());
            0
        }
        Err(e) => {
            error!(error = %e, "batch setup failed");
            eprintln!("Error: {}", e);
            SETUP_FAILED
        }
    }
}

fn run_batch(args: BatchArgs) -> Result<BatchReport, BatchError>
{
    let workers = if args.workers >= 1 {
        args.workers
    } else {
        warn!(workers = args.workers, "invalid worker count, using {FALLBACK_WORKERS}");
        FALLBACK_WORKERS
    };
    let poll_secs = if args.poll_secs >= 1 {
        args.poll_secs
    } else {
        FALLBACK_POLL_SECS
    };
    info!("Setup {workers} workers, progress every {poll_secs}s");
    if args.dump_output {
        warn!("job output is kept in memory until the job ends and logged at debug level");
    }

    let (program, target_args) = args.target.split_first().ok_or(BatchError::MissingTarget)?;
    match count_placeholders(target_args) {
        0 if !args.stdin => return Err(BatchError::NowhereToPassInput),
        0 | 1 => {}
        n => warn!("{n} placeholders in the target command, each gets the input path"),
    }

    let inputs = collect_inputs(&args.input_dir)?;
    if inputs.is_empty() {
        return Err(BatchError::NoInputs(args.input_dir));
    }
    let jobs = plan_jobs(&args.input_dir, &inputs, &args.data_dir, args.symbols_dir.as_deref());
    create_output_dirs(&jobs)?;

    let template = JobTemplate {
        tracer: std::env::current_exe().map_err(BatchError::CurrentExe)?,
        granularity: args.granularity,
        blocked: args.blocked,
        bare_symbols: args.bare_symbols,
        program: program.clone(),
        args: target_args.to_vec(),
        stdin: args.stdin,
        dump_output: args.dump_output,
        timeout: args.timeout.map(Duration::from_secs),
        log_files: args
            .log_dir
            .as_deref()
            .map(|dir| worker_log_paths(dir, workers))
            .unwrap_or_default(),
    };

    let runtime = tokio::runtime::Runtime::new().map_err(BatchError::Runtime)?;
    let report = runtime.block_on(run_jobs(
        Arc::new(template),
        jobs.clone(),
        workers,
        Duration::from_secs(poll_secs),
    ));
    report.log(&jobs);
    Ok(report)
}

/// Number of placeholders across all target arguments.
fn count_placeholders(args: &[String]) -> usize
{
    args.iter().map(|arg| arg.matches(FILE_PLACEHOLDER).count()).sum()
}

/// Target arguments for one input.
fn substitute(args: &[String], input: &Path) -> Vec<OsString>
{
    args.iter()
        .map(|arg| {
            if arg == FILE_PLACEHOLDER {
                input.as_os_str().to_owned()
            } else if arg.contains(FILE_PLACEHOLDER) {
                OsString::from(arg.replace(FILE_PLACEHOLDER, &input.to_string_lossy()))
            } else {
                OsString::from(arg)
            }
        })
        .collect()
}

/// Every file under `root`, as paths relative to it, sorted.
fn collect_inputs(root: &Path) -> Result<Vec<PathBuf>, BatchError>
{
    let mut files = Vec::new();
    walk(root, Path::new(""), &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(root: &Path, relative: &Path, files: &mut Vec<PathBuf>) -> Result<(), BatchError>
{
    let dir = root.join(relative);
    let read_error = |source: io::Error| BatchError::InputDir {
        path: dir.clone(),
        source,
    };

    for entry in fs::read_dir(&dir).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        let path = relative.join(entry.file_name());
        // Follows symlinks, like the metadata of the file the target would open
        let metadata = fs::metadata(entry.path()).map_err(read_error)?;
        if metadata.is_dir() {
            walk(root, &path, files)?;
        } else if metadata.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

/// Mirror each relative input path under the output directories.
fn plan_jobs(input_dir: &Path, inputs: &[PathBuf], data_dir: &Path, symbols_dir: Option<&Path>) -> Vec<Job>
{
    inputs
        .iter()
        .enumerate()
        .map(|(index, relative)| Job {
            index,
            input: input_dir.join(relative),
            data: data_dir.join(relative),
            symbols: symbols_dir.map(|dir| dir.join(relative)),
        })
        .collect()
}

fn create_output_dirs(jobs: &[Job]) -> Result<(), BatchError>
{
    for job in jobs {
        for path in std::iter::once(&job.data).chain(&job.symbols) {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| BatchError::OutputDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
    }
    Ok(())
}

/// Worker slots: a semaphore bounds concurrency, the free list says which
/// slot (and so which log file) a job gets.
#[derive(Clone)]
struct WorkerPool
{
    permits: Arc<Semaphore>,
    free: Arc<Mutex<Vec<usize>>>,
}

struct WorkerSlot
{
    index: usize,
    free: Arc<Mutex<Vec<usize>>>,
    _permit: OwnedSemaphorePermit,
}

impl WorkerPool
{
    fn new(workers: usize) -> Self
    {
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            free: Arc::new(Mutex::new((0..workers).rev().collect())),
        }
    }

    /// Wait for a free slot. `None` if the pool was closed.
    async fn checkout(&self) -> Option<WorkerSlot>
    {
        let permit = Arc::clone(&self.permits).acquire_owned().await.ok()?;
        let index = self.free.lock().unwrap_or_else(PoisonError::into_inner).pop()?;
        Some(WorkerSlot {
            index,
            free: Arc::clone(&self.free),
            _permit: permit,
        })
    }
}

impl Drop for WorkerSlot
{
    fn drop(&mut self)
    {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).push(self.index);
    }
}

async fn run_jobs(template: Arc<JobTemplate>, jobs: Vec<Job>, workers: usize, poll: Duration) -> BatchReport
{
    let pool = WorkerPool::new(workers);
    let total = jobs.len();
    let mut set = JoinSet::new();

    for job in jobs {
        let pool = pool.clone();
        let template = Arc::clone(&template);
        set.spawn(async move {
            let Some(slot) = pool.checkout().await else {
                return (job.index, JobStatus::Failed);
            };
            let status = run_job(&template, &job, slot.index).await;
            (job.index, status)
        });
    }
    info!("Submitted {total} jobs");

    let mut report = BatchReport::default();
    loop {
        match tokio::time::timeout(poll, set.join_next()).await {
            Ok(Some(Ok((index, status)))) => report.record(index, status),
            Ok(Some(Err(e))) => error!(error = %e, "job task failed"),
            Ok(None) => break,
            Err(_) => info!(done = report.total(), total, "batch in progress"),
        }
    }
    report
}

async fn run_job(template: &JobTemplate, job: &Job, worker: usize) -> JobStatus
{
    let mut command = match template.command(job, worker) {
        Ok(command) => command,
        Err(e) => {
            error!(job = job.index, input = %job.input.display(), error = %e, "cannot prepare job");
            return JobStatus::Failed;
        }
    };
    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(job = job.index, error = %e, "cannot start job");
            return JobStatus::Failed;
        }
    };
    debug!(job = job.index, worker, input = %job.input.display(), "job started");

    // Dropping the child on timeout kills it
    let finished = child.wait_with_output();
    let output = match template.timeout {
        Some(limit) => match tokio::time::timeout(limit, finished).await {
            Ok(output) => output,
            Err(_) => {
                warn!(job = job.index, input = %job.input.display(), "job timed out");
                return JobStatus::Timeout;
            }
        },
        None => finished.await,
    };

    match output {
        Ok(output) => {
            if template.dump_output {
                debug!(
                    job = job.index,
                    stdout = %String::from_utf8_lossy(&output.stdout),
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "job output"
                );
            }
            JobStatus::Code(exit_code(output.status))
        }
        Err(e) => {
            error!(job = job.index, error = %e, "cannot wait for job");
            JobStatus::Failed
        }
    }
}

impl JobTemplate
{
    fn command(&self, job: &Job, worker: usize) -> io::Result<Command>
    {
        let mut command = Command::new(&self.tracer);
        command.arg("run").arg("--data").arg(&job.data);
        if let Some(symbols) = &job.symbols {
            command.arg("--symbols").arg(symbols);
        }
        command.arg("--granularity").arg(&self.granularity);
        if !self.blocked.is_empty() {
            command.arg("--blocked").arg(&self.blocked);
        }
        if self.bare_symbols {
            command.arg("--bare-symbols");
        }
        command
            .arg("--forward-exit-status")
            .arg("--")
            .arg(&self.program)
            .args(substitute(&self.args, &job.input));

        if let Some(log_file) = self.log_files.get(worker) {
            command.env(LOG_FILE_ENV, log_file);
        }

        let stdin = if self.stdin {
            Stdio::from(File::open(&job.input)?)
        } else {
            Stdio::null()
        };
        let (stdout, stderr) = if self.dump_output {
            (Stdio::piped(), Stdio::piped())
        } else {
            (Stdio::null(), Stdio::null())
        };
        command.stdin(stdin).stdout(stdout).stderr(stderr).kill_on_drop(true);
        Ok(command)
    }
}

/// Exit code of a finished job; a job killed by a signal reports `128 + signal`.
fn exit_code(status: ExitStatus) -> i32
{
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(-1)
}
