use crate::utils::print_stage_outcome;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;
use tierflow_pipeline::{PipelineObserver, ReadinessTarget, StageDescriptor, StageOutcome};

/// ステージの進行をスピナーで表示し、完了したら結果を1行ずつ出力する
pub struct StageProgress {
    current: Mutex<Option<ProgressBar>>,
}

impl StageProgress {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    fn spinner(message: String) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    fn set_message(&self, message: String) {
        if let Ok(current) = self.current.lock() {
            if let Some(pb) = current.as_ref() {
                pb.set_message(message);
            }
        }
    }

    fn clear(&self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(pb) = current.take() {
                pb.finish_and_clear();
            }
        }
    }
}

impl PipelineObserver for StageProgress {
    fn stage_started(&self, descriptor: &StageDescriptor) {
        let message = format!("[{}/6] {} を適用中...", descriptor.ordinal, descriptor.name);
        if let Ok(mut current) = self.current.lock() {
            if let Some(previous) = current.replace(Self::spinner(message)) {
                previous.finish_and_clear();
            }
        }
    }

    fn stage_skipped(&self, descriptor: &StageDescriptor) {
        print_stage_outcome(descriptor.ordinal, &descriptor.name, &StageOutcome::Skipped);
    }

    fn waiting_for(&self, descriptor: &StageDescriptor, target: &ReadinessTarget) {
        self.set_message(format!(
            "[{}/6] {} の起動を待機中 (最大{}秒)",
            descriptor.ordinal,
            target.endpoint.address().cyan(),
            target.policy.timeout.as_secs()
        ));
    }

    fn stage_finished(&self, descriptor: &StageDescriptor, outcome: &StageOutcome) {
        self.clear();
        print_stage_outcome(descriptor.ordinal, &descriptor.name, outcome);
    }
}
