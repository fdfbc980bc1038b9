use tokio::sync::mpsc;
use sysinfo::System;
use crate::loggers::core::{LogRecord, SysInfo};
use crate::loggers::transports::Transport;

pub struct LogWorker {
    receiver: mpsc::Receiver<LogRecord>,
    sys: System,
    transports: Vec<Box<dyn Transport>>,
}

impl LogWorker {
    pub fn new(receiver: mpsc::Receiver<LogRecord>, transports: Vec<Box<dyn Transport>>) -> Self {
        // sysinfo 0.30: System::new_all() includes CPU/Memory initialization
        let mut sys = System::new_all();
        sys.refresh_all();
        Self { receiver, sys, transports }
    }

    /// Drains records until every `Logger` clone has been dropped.
    pub async fn run(mut self) {
        while let Some(mut record) = self.receiver.recv().await {
            self.sys.refresh_cpu();
            self.sys.refresh_memory();

            let load = System::load_average();
            record.sys = Some(SysInfo {
                cpu_usage: self.sys.global_cpu_info().cpu_usage(),
                mem_used_kb: self.sys.used_memory() / 1024,
                load_avg: vec![load.one, load.five, load.fifteen],
                uptime_secs: System::uptime(),
            });

            if let Ok(json) = serde_json::to_string(&record) {
                for transport in self.transports.iter_mut() {
                    transport.write_line(&json);
                }
            }
        }
    }
}
