//! 远程日志上报
//!
//! 日志事件先进入内存队列，攒够一批或到达定时间隔后发送到服务端。
//! 发送失败的批次放回队首，下次一起发送。

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::field::{Field, Visit};
use tracing::{warn, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::api::{ClientLogBatch, ClientLogRecord, LogSink};

/// 服务端长期不可用时内存中最多保留的条数，超出后丢弃最旧的
const MAX_QUEUED_RECORDS: usize = 5000;

/// 定时间隔下限
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// 这些来源的日志不上报，上报请求本身会产生它们
const SKIPPED_TARGETS: [&str; 5] = [module_path!(), "hyper", "reqwest", "h2", "rustls"];

fn is_skipped(target: &str) -> bool {
    SKIPPED_TARGETS
        .iter()
        .any(|prefix| target.starts_with(prefix))
}

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "error",
        Level::WARN => "warn",
        Level::INFO => "info",
        _ => "log",
    }
}

enum RemoteCommand {
    Record(ClientLogRecord),
    Shutdown,
}

/// 收集消息和字段，消息排在最前
#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn into_messages(self) -> Vec<String> {
        self.message.into_iter().chain(self.fields).collect()
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// 把日志事件转成上报记录的 tracing 层
pub struct RemoteLogLayer {
    tx: mpsc::UnboundedSender<RemoteCommand>,
}

impl<S: Subscriber> Layer<S> for RemoteLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_skipped(metadata.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let record = ClientLogRecord {
            level: level_name(metadata.level()).to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            messages: visitor.into_messages(),
        };

        // 上报任务已退出时直接丢弃
        let _ = self.tx.send(RemoteCommand::Record(record));
    }
}

/// 尚未启动的上报通道
///
/// 日志系统初始化时还没有 HTTP 客户端，启动前的日志暂存在通道中
pub struct RemoteLogChannel {
    tx: mpsc::UnboundedSender<RemoteCommand>,
    rx: mpsc::UnboundedReceiver<RemoteCommand>,
    batch_size: usize,
    flush_interval: Duration,
}

/// 创建上报层和对应的通道
pub fn remote_channel(
    batch_size: usize,
    flush_interval: Duration,
) -> (RemoteLogLayer, RemoteLogChannel) {
    let (tx, rx) = mpsc::unbounded_channel();
    let layer = RemoteLogLayer { tx: tx.clone() };
    let channel = RemoteLogChannel {
        tx,
        rx,
        batch_size: batch_size.max(1),
        flush_interval: flush_interval.max(MIN_FLUSH_INTERVAL),
    };
    (layer, channel)
}

impl RemoteLogChannel {
    /// 启动后台上报任务
    pub fn start(self, sink: Arc<dyn LogSink>) -> RemoteLogHandle {
        let shipper = LogShipper {
            sink,
            batch_size: self.batch_size,
            queue: VecDeque::new(),
        };
        let task = tokio::spawn(shipper.run(self.rx, self.flush_interval));
        RemoteLogHandle { tx: self.tx, task }
    }
}

/// 上报任务句柄
pub struct RemoteLogHandle {
    tx: mpsc::UnboundedSender<RemoteCommand>,
    task: JoinHandle<()>,
}

impl RemoteLogHandle {
    /// 发送剩余日志并停止上报任务
    pub async fn shutdown(self) {
        if self.tx.send(RemoteCommand::Shutdown).is_ok() {
            let _ = self.task.await;
        }
    }
}

struct LogShipper {
    sink: Arc<dyn LogSink>,
    batch_size: usize,
    queue: VecDeque<ClientLogRecord>,
}

impl LogShipper {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<RemoteCommand>,
        flush_interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即完成
        ticker.tick().await;

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(RemoteCommand::Record(record)) => {
                        self.queue.push_back(record);
                        if self.queue.len() >= self.batch_size {
                            self.flush().await;
                        }
                    }
                    Some(RemoteCommand::Shutdown) | None => {
                        self.flush().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.flush().await,
            }
        }
    }

    /// 发送队列中的全部日志
    async fn flush(&mut self) {
        if self.queue.is_empty() {
            return;
        }

        let batch = ClientLogBatch {
            logs: self.queue.drain(..).collect(),
        };

        if let Err(e) = self.sink.send_logs(&batch).await {
            warn!("日志上报失败，{} 条日志放回队列: {}", batch.logs.len(), e);
            self.requeue_front(batch.logs);
        }
    }

    fn requeue_front(&mut self, records: Vec<ClientLogRecord>) {
        for record in records.into_iter().rev() {
            self.queue.push_front(record);
        }

        if self.queue.len() > MAX_QUEUED_RECORDS {
            let dropped = self.queue.len() - MAX_QUEUED_RECORDS;
            self.queue.drain(..dropped);
            warn!("日志队列已满，丢弃最早的 {} 条", dropped);
        }
    }
}
