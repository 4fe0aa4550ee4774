use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::pipeline::PipelineError;
use crate::worker::queue::{ChannelQueue, Delivery};

/// Consumes one queue body. An `Err` that is retryable puts the message back
/// on the queue; any other error dead-letters it.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: &str) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acknowledged,
    Redelivered,
    DeadLettered,
}

/// What happened to one delivery.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub message_id: String,
    pub receive_count: u32,
    pub disposition: Disposition,
    pub error: Option<String>,
}

/// A fixed set of threads consuming a [`ChannelQueue`].
pub struct ConsumerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    report_receiver: Receiver<DeliveryReport>,
}

struct ConsumerContext {
    queue: Arc<ChannelQueue>,
    handler: Arc<dyn MessageHandler>,
    reports: Sender<DeliveryReport>,
    shutdown: Arc<AtomicBool>,
    max_receive_count: u32,
}

impl ConsumerPool {
    /// Starts `worker_count` consumers.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn start(
        queue: Arc<ChannelQueue>,
        handler: Arc<dyn MessageHandler>,
        worker_count: usize,
        max_receive_count: u32,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (report_sender, report_receiver) = unbounded::<DeliveryReport>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let context = ConsumerContext {
                queue: Arc::clone(&queue),
                handler: Arc::clone(&handler),
                reports: report_sender.clone(),
                shutdown: Arc::clone(&shutdown),
                max_receive_count,
            };
            workers.push(thread::spawn(move || run_consumer(worker_id, context)));
        }

        info!(
            "Started {} consumers on queue '{}'",
            worker_count,
            queue.name()
        );

        Self {
            workers,
            shutdown,
            report_receiver,
        }
    }

    pub fn try_recv_report(&self) -> Option<DeliveryReport> {
        self.report_receiver.try_recv().ok()
    }

    pub fn recv_report_timeout(&self, timeout: Duration) -> Option<DeliveryReport> {
        self.report_receiver.recv_timeout(timeout).ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down consumer pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Signals shutdown and joins every consumer.
    pub fn wait(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Consumer {} panicked: {:?}", i, e);
            } else {
                debug!("Consumer {} finished", i);
            }
        }
        info!("All consumers have stopped");
    }
}

fn run_consumer(worker_id: usize, context: ConsumerContext) {
    debug!("Consumer {} started", worker_id);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Consumer {} could not build its runtime: {}", worker_id, e);
            return;
        }
    };
    let receiver = context.queue.receiver();

    loop {
        if context.shutdown.load(Ordering::Relaxed) {
            debug!("Consumer {} received shutdown signal", worker_id);
            break;
        }

        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(delivery) => {
                let report = runtime.block_on(process_delivery(&context, delivery));
                if let Err(e) = context.reports.send(report) {
                    error!("Consumer {} failed to send report: {}", worker_id, e);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Consumer {} queue disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Consumer {} stopped", worker_id);
}

async fn process_delivery(context: &ConsumerContext, delivery: Delivery) -> DeliveryReport {
    let message_id = delivery.message_id.clone();
    let receive_count = delivery.receive_count;

    let (disposition, error) = match context.handler.handle(&delivery.body).await {
        Ok(()) => (Disposition::Acknowledged, None),
        Err(e) => {
            let message = e.to_string();
            if e.is_retryable() && receive_count < context.max_receive_count {
                match context.queue.redeliver(delivery) {
                    Ok(()) => (Disposition::Redelivered, Some(message)),
                    Err(queue_err) => {
                        error!("Could not redeliver {}: {}", message_id, queue_err);
                        (Disposition::DeadLettered, Some(message))
                    }
                }
            } else {
                context.queue.dead_letter(delivery);
                (Disposition::DeadLettered, Some(message))
            }
        }
    };

    DeliveryReport {
        message_id,
        receive_count,
        disposition,
        error,
    }
}
