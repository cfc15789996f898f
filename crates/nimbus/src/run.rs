use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::LocalSet;
use tokio::time::MissedTickBehavior;

use nimbus_core::infra::connectivity::create_connectivity_check;
use nimbus_core::infra::create_infra_manager;
use nimbus_core::infra::provider::create_provider;
use nimbus_core::infra::store::create_store;
use nimbus_core::job::{Job, JobCounters};
use nimbus_core::scheduler::monitor::LocalTaskMonitor;
use nimbus_core::scheduler::service::create_scheduler_service;
use nimbus_core::{JobId, SchedulerId};

use crate::common::cli::{CheckConfigOpts, CheckJobOpts, OutputMode, RunOpts};
use crate::config::NimbusConfig;
use crate::jobfile::JobDef;

const STATUS_PERIOD: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub name: String,
    #[serde(flatten)]
    pub counters: JobCounters,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// The run was stopped before every job finished.
    pub interrupted: bool,
    pub jobs: Vec<JobSummary>,
}

impl RunSummary {
    fn print(&self, mode: OutputMode) -> anyhow::Result<()> {
        match mode {
            OutputMode::Json => println!("{}", serde_json::to_string_pretty(self)?),
            OutputMode::Cli => {
                let duration = (self.finished_at - self.started_at)
                    .to_std()
                    .unwrap_or_default();
                let duration = Duration::from_secs(duration.as_secs());
                println!(
                    "Run started at {}, took {}{}",
                    self.started_at.format("%Y-%m-%d %H:%M:%S"),
                    humantime::format_duration(duration),
                    if self.interrupted { " (interrupted)" } else { "" }
                );
                for job in &self.jobs {
                    let JobCounters {
                        ready,
                        running,
                        completed,
                        failed,
                    } = job.counters;
                    print!(
                        "Job {} ({}): {completed} completed, {failed} failed",
                        job.id, job.name
                    );
                    if ready + running > 0 {
                        print!(", {} unfinished", ready + running);
                    }
                    println!();
                }
            }
        }
        Ok(())
    }
}

/// Runs jobs until all of them are finished or `stop_signal` resolves.
///
/// Has to be polled inside a [`LocalSet`].
pub async fn run_jobs(
    config: NimbusConfig,
    jobs: Vec<JobDef>,
    wait_initial: bool,
    stop_signal: impl Future<Output = ()>,
) -> anyhow::Result<RunSummary> {
    let started_at = Utc::now();
    let NimbusConfig {
        infrastructure,
        provider,
        scheduler,
    } = config;

    let store = create_store(infrastructure.persistence.as_deref());
    let provider = create_provider(&provider);
    let connectivity = create_connectivity_check(
        infrastructure.connectivity,
        infrastructure.connection_timeout,
        infrastructure.connection_retries,
    );
    let (infra, infra_process) = create_infra_manager(infrastructure, provider, connectivity, store);
    let infra_process = tokio::task::spawn_local(infra_process);

    let mut stop_signal = std::pin::pin!(stop_signal);
    let mut interrupted = false;

    if wait_initial {
        log::info!("Waiting for initial resources");
        tokio::select! {
            result = infra.wait_for_initial_resources() => result?,
            _ = &mut stop_signal => {
                log::info!("Interrupted while waiting for initial resources");
                interrupted = true;
            }
        }
    }

    let (scheduler, scheduler_process) = create_scheduler_service(
        SchedulerId::new(1),
        scheduler,
        infra.clone(),
        |handle| Box::new(LocalTaskMonitor::new(handle)),
    );
    let scheduler_process = tokio::task::spawn_local(scheduler_process);

    let jobs: Vec<Arc<Job>> = jobs
        .into_iter()
        .zip(1..)
        .map(|(jdef, id)| Arc::new(jdef.into_job(JobId::new(id))))
        .collect();

    if !interrupted {
        for job in &jobs {
            scheduler.add_job(job.clone());
        }

        let mut status_interval = tokio::time::interval(STATUS_PERIOD);
        status_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = status_interval.tick() => {
                    if scheduler.status().await?.all_finished() {
                        log::info!("All jobs are finished");
                        break;
                    }
                }
                _ = &mut stop_signal => {
                    log::info!("Received SIGINT, attempting to stop");
                    interrupted = true;
                    break;
                }
            }
        }
    }

    log::debug!("Infrastructure before shutdown: {:?}", infra.snapshot().await?);
    scheduler.stop().await?;
    scheduler_process.await?;
    infra.stop().await?;
    infra_process.await?;

    Ok(RunSummary {
        started_at,
        finished_at: Utc::now(),
        interrupted,
        jobs: jobs
            .iter()
            .map(|job| JobSummary {
                id: job.id(),
                name: job.name().to_string(),
                counters: job.counters(),
            })
            .collect(),
    })
}

pub async fn command_run(opts: RunOpts, output_mode: OutputMode) -> anyhow::Result<()> {
    let config = NimbusConfig::load(&opts.config)?;
    let jobs = opts
        .jobs
        .iter()
        .map(|path| JobDef::load(path))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let stop_signal = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            log::error!("Cannot listen for SIGINT: {error}");
            std::future::pending::<()>().await;
        }
    };
    let summary = LocalSet::new()
        .run_until(run_jobs(config, jobs, opts.wait_initial, stop_signal))
        .await?;
    summary.print(output_mode)
}

pub fn command_check_config(opts: CheckConfigOpts) -> anyhow::Result<()> {
    let config = NimbusConfig::load(&opts.config)?;
    let infra = &config.infrastructure;
    println!("Configuration {} is valid", opts.config.display());
    println!(
        "Elastic: {}, initial specifications: {}, provider: {}",
        infra.elastic,
        infra.initial_specs.len(),
        config.provider.name()
    );
    Ok(())
}

pub fn command_check_job(opts: CheckJobOpts) -> anyhow::Result<()> {
    for path in &opts.jobs {
        let jdef = JobDef::load(path)?;
        println!(
            "Job {} ({}) is valid, {} tasks",
            jdef.name,
            path.display(),
            jdef.task_count()
        );
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use tokio::task::LocalSet;

    use super::run_jobs;
    use crate::config::NimbusConfig;
    use crate::jobfile::JobDef;

    fn fast_config(extra: &str) -> NimbusConfig {
        NimbusConfig::parse(&format!(
            r#"
[infrastructure]
order-period = "10ms"
resource-period = "10ms"
connectivity = "none"
{extra}

[scheduler]
tick-period = "10ms"
max-task-retries = 1
"#
        ))
        .unwrap()
    }

    fn job(commands: &[(&str, u32)]) -> JobDef {
        let tasks: String = commands
            .iter()
            .map(|(command, count)| {
                format!(
                    "[[tasks]]\ncommands = [\"{command}\"]\ncount = {count}\nspec = {{ image = \"ubuntu\", public-key = \"key\" }}\n"
                )
            })
            .collect();
        JobDef::parse(&format!("name = \"test\"\n{tasks}")).unwrap()
    }

    #[tokio::test]
    async fn run_until_jobs_finish() {
        let summary = LocalSet::new()
            .run_until(run_jobs(
                fast_config(""),
                vec![job(&[("true", 3), ("exit 1", 1)])],
                false,
                std::future::pending(),
            ))
            .await
            .unwrap();

        assert!(!summary.interrupted);
        assert_eq!(summary.jobs.len(), 1);
        let counters = &summary.jobs[0].counters;
        assert_eq!(counters.completed, 3);
        // The failing task and its single retry
        assert_eq!(counters.failed, 2);
        assert_eq!(counters.ready + counters.running, 0);
    }

    #[tokio::test]
    async fn run_with_initial_resources() {
        let config = fast_config(
            r#"
[[infrastructure.initial-specs]]
image = "ubuntu"
public-key = "key"
"#,
        );
        let summary = tokio::time::timeout(
            Duration::from_secs(20),
            LocalSet::new().run_until(run_jobs(
                config,
                vec![job(&[("true", 2)])],
                true,
                std::future::pending(),
            )),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(summary.jobs[0].counters.completed, 2);
    }

    #[tokio::test]
    async fn stop_signal_interrupts_run() {
        let summary = LocalSet::new()
            .run_until(run_jobs(
                fast_config(""),
                vec![job(&[("sleep 100", 1)])],
                false,
                tokio::time::sleep(Duration::from_millis(300)),
            ))
            .await
            .unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.jobs[0].counters.completed, 0);
    }
}
