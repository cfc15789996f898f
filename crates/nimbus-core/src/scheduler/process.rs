use tokio::time::MissedTickBehavior;

use crate::common::rpc::RpcReceiver;
use crate::scheduler::service::SchedulerMessage;
use crate::scheduler::Scheduler;

/// The scheduler actor. Reacts to messages and runs a scheduling pass every tick period.
pub async fn scheduler_process(mut scheduler: Scheduler, mut receiver: RpcReceiver<SchedulerMessage>) {
    let mut tick_interval = tokio::time::interval(scheduler.config().tick_period);
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let stop_token = loop {
        tokio::select! {
            _ = tick_interval.tick() => {
                scheduler.tick();
            }
            message = receiver.recv() => {
                match message {
                    Some(SchedulerMessage::Stop(token)) => break Some(token),
                    Some(message) => handle_message(&mut scheduler, message),
                    None => break None,
                }
            }
        }
    };

    log::debug!("Scheduler {} is stopping", scheduler.handle().id());
    scheduler.stop();
    if let Some(token) = stop_token {
        token.respond(());
    }
}

pub(crate) fn handle_message(scheduler: &mut Scheduler, message: SchedulerMessage) {
    log::trace!("Handling scheduler message: {message:?}");
    match message {
        SchedulerMessage::ResourceReady(resource) => scheduler.resource_ready(resource),
        SchedulerMessage::TaskCompleted(task_id) => scheduler.task_completed(task_id),
        SchedulerMessage::TaskFailed(task_id, reason) => scheduler.task_failed(task_id, &reason),
        SchedulerMessage::ResourceLost(resource_id) => scheduler.resource_lost(&resource_id),
        SchedulerMessage::ResourceUnreachable(resource_id) => {
            scheduler.resource_unreachable(&resource_id)
        }
        SchedulerMessage::AddJob(job) => scheduler.add_job(job),
        SchedulerMessage::RemoveJob(job_id, token) => token.respond(scheduler.remove_job(job_id)),
        SchedulerMessage::GetStatus(token) => token.respond(scheduler.status()),
        SchedulerMessage::Stop(token) => {
            scheduler.stop();
            token.respond(());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use log::LevelFilter;

    use crate::common::rpc::make_rpc_queue;
    use crate::infra::connectivity::AlwaysReachable;
    use crate::infra::provider::local::{LocalProvider, LocalProviderConfig};
    use crate::infra::service::{InfraManagerService, InfraMessage};
    use crate::infra::store::NullStore;
    use crate::infra::{create_infra_manager, InfrastructureConfig};
    use crate::job::Job;
    use crate::scheduler::monitor::LocalTaskMonitor;
    use crate::scheduler::service::create_scheduler_service;
    use crate::scheduler::SchedulerConfig;
    use crate::specification::Specification;
    use crate::{JobId, SchedulerId};

    fn init_logging() {
        let _ = env_logger::Builder::default()
            .filter(None, LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }

    fn fast_scheduler() -> SchedulerConfig {
        SchedulerConfig {
            tick_period: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn stopped_scheduler_withdraws_orders() {
        init_logging();
        let (infra_tx, mut infra_rx) = make_rpc_queue();
        let (service, process) = create_scheduler_service(
            SchedulerId::new(3),
            fast_scheduler(),
            InfraManagerService::new(infra_tx),
            |handle| Box::new(LocalTaskMonitor::new(handle)),
        );

        tokio::task::LocalSet::new()
            .run_until(async move {
                let process = tokio::task::spawn_local(process);
                let job = Arc::new(Job::new(JobId::new(1), "job"));
                job.add_task(Specification::new("image", "key"), vec![]);
                service.add_job(job.clone());

                let status = service.status().await.unwrap();
                assert_eq!(status.jobs.len(), 1);
                assert_eq!(status.jobs[0].counters.ready, 1);
                assert!(!status.all_finished());

                let removed = service.remove_job(job.id()).await.unwrap();
                assert!(removed.is_some());
                service.stop().await.unwrap();
                process.await.unwrap();
                assert!(service.status().await.is_err());
            })
            .await;

        let mut withdrawn = false;
        while let Ok(message) = infra_rx.try_recv() {
            if let InfraMessage::WithdrawOrders(id) = message {
                assert_eq!(id, SchedulerId::new(3));
                withdrawn = true;
            }
        }
        assert!(withdrawn);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tasks_run_on_provisioned_resources() {
        init_logging();
        let infra_config = InfrastructureConfig {
            order_period: Duration::from_millis(10),
            resource_period: Duration::from_millis(10),
            ..Default::default()
        };
        let (infra, infra_process) = create_infra_manager(
            infra_config,
            Box::new(LocalProvider::new(LocalProviderConfig::default())),
            Box::new(AlwaysReachable),
            Box::new(NullStore),
        );
        let (scheduler, scheduler_process) = create_scheduler_service(
            SchedulerId::new(1),
            fast_scheduler(),
            infra.clone(),
            |handle| Box::new(LocalTaskMonitor::new(handle)),
        );

        tokio::task::LocalSet::new()
            .run_until(async move {
                let infra_process = tokio::task::spawn_local(infra_process);
                let scheduler_process = tokio::task::spawn_local(scheduler_process);

                let job = Arc::new(Job::new(JobId::new(1), "job"));
                for _ in 0..3 {
                    job.add_task(Specification::new("image", "key"), vec!["true".to_string()]);
                }
                scheduler.add_job(job.clone());

                let finished = tokio::time::timeout(Duration::from_secs(20), async {
                    loop {
                        if scheduler.status().await.unwrap().all_finished() {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                })
                .await;
                assert!(finished.is_ok());
                assert_eq!(job.counters().completed, 3);

                scheduler.stop().await.unwrap();
                scheduler_process.await.unwrap();
                infra.stop().await.unwrap();
                infra_process.await.unwrap();
            })
            .await;
    }
}
