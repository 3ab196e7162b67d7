//! Application state of the operator shell and the single reducer that
//! changes it.
use std::collections::VecDeque;

use crate::backend::LogEntry;
use crate::batch::{BatchEvent, BatchProgress};
use crate::poller::PollEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Tab {
    #[default]
    Review,
    Manual,
    Auto,
}

const LOG_CAPACITY: usize = 500;

/// Bounded list of operator-facing lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogConsole {
    lines: VecDeque<String>,
}

impl LogConsole {
    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == LOG_CAPACITY {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppState {
    pub tab: Tab,
    pub selected_record: Option<String>,
    pub logs: LogConsole,
    pub processing: bool,
    pub progress: Option<BatchProgress>,
    pub reviewers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SwitchTab(Tab),
    Select(Option<String>),
    Log(String),
    ProcessingStarted,
    ProcessingFinished,
    Progress(BatchProgress),
    ReviewersLoaded(Vec<String>),
}

impl AppState {
    pub fn reduce(&mut self, action: Action) {
        match action {
            Action::SwitchTab(tab) => {
                if tab != self.tab {
                    self.tab = tab;
                    self.logs.clear();
                    self.processing = false;
                    self.progress = None;
                }
            }
            Action::Select(record) => self.selected_record = record,
            Action::Log(line) => self.logs.push(line),
            Action::ProcessingStarted => self.processing = true,
            Action::ProcessingFinished => self.processing = false,
            Action::Progress(progress) => self.progress = Some(progress),
            Action::ReviewersLoaded(reviewers) => self.reviewers = reviewers,
        }
    }
}

/// Console line for a poll event.
pub fn poll_line(event: &PollEvent) -> String {
    match event {
        PollEvent::Attempt {
            attempt,
            max_attempts,
        } => format!("확인 중... ({}/{})", attempt, max_attempts),
        PollEvent::Log(LogEntry { message, .. }) => message.clone(),
        PollEvent::CheckFailed(reason) => format!("확인 실패: {}", reason),
        PollEvent::Completed => "작업 완료".to_string(),
        PollEvent::TimedOut => "시간 초과: 작업이 아직 끝나지 않았습니다".to_string(),
        PollEvent::Cancelled => "취소됨".to_string(),
    }
}

pub fn batch_line(event: &BatchEvent) -> String {
    match event {
        BatchEvent::Triggered(reply) => format!("워크플로 시작: {:?}", reply),
        BatchEvent::Discovered(post_id) => format!("새 포스트 감지: {}", post_id),
        BatchEvent::Finished {
            post_id,
            completed,
            requested,
        } => format!("완료 {}/{}: {}", completed, requested, post_id),
        BatchEvent::CheckFailed(reason) => format!("확인 실패: {}", reason),
        BatchEvent::Completed => "배치 완료".to_string(),
        BatchEvent::TimedOut => "시간 초과: 배치가 5분 안에 끝나지 않았습니다".to_string(),
        BatchEvent::Cancelled => "취소됨".to_string(),
    }
}

pub const SPLIT_MIN: f64 = 20.0;
pub const SPLIT_MAX: f64 = 80.0;

/// Two-pane split. Width is the left pane's share of the container in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitPane {
    left_percent: f64,
    dragging: bool,
}

impl Default for SplitPane {
    fn default() -> Self {
        Self {
            left_percent: 50.0,
            dragging: false,
        }
    }
}

impl SplitPane {
    pub fn left_percent(&self) -> f64 {
        self.left_percent
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn press(&mut self) {
        self.dragging = true;
    }

    /// Ignored unless a drag is in progress.
    pub fn pointer_moved(&mut self, pointer_x: f64, container_left: f64, container_width: f64) {
        if !self.dragging || container_width <= 0.0 {
            return;
        }
        let percent = (pointer_x - container_left) / container_width * 100.0;
        self.left_percent = percent.clamp(SPLIT_MIN, SPLIT_MAX);
    }

    pub fn release(&mut self) {
        self.dragging = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn tab_switch_resets_transient_state_but_keeps_selection() {
        let mut state = AppState::default();
        state.reduce(Action::Select(Some("rec1".into())));
        state.reduce(Action::Log("hello".into()));
        state.reduce(Action::ProcessingStarted);
        state.reduce(Action::Progress(BatchProgress::new(3, Utc::now())));

        state.reduce(Action::SwitchTab(Tab::Auto));
        assert_eq!(state.tab, Tab::Auto);
        assert_eq!(state.selected_record.as_deref(), Some("rec1"));
        assert!(state.logs.is_empty());
        assert!(!state.processing);
        assert!(state.progress.is_none());
    }

    #[test]
    fn switching_to_current_tab_is_a_no_op() {
        let mut state = AppState::default();
        state.reduce(Action::Log("keep".into()));
        state.reduce(Action::SwitchTab(Tab::Review));
        assert_eq!(state.logs.len(), 1);
    }

    #[test]
    fn event_lines() {
        assert_eq!(
            poll_line(&PollEvent::Attempt {
                attempt: 3,
                max_attempts: 60
            }),
            "확인 중... (3/60)"
        );
        assert_eq!(
            batch_line(&BatchEvent::Finished {
                post_id: "QA_a".into(),
                completed: 1,
                requested: 3
            }),
            "완료 1/3: QA_a"
        );
    }

    #[test]
    fn console_is_bounded() {
        let mut console = LogConsole::default();
        for i in 0..(LOG_CAPACITY + 5) {
            console.push(i.to_string());
        }
        assert_eq!(console.len(), LOG_CAPACITY);
        assert_eq!(console.lines().next(), Some("5"));
    }

    #[test]
    fn split_clamps_and_tracks_only_while_dragging() {
        let mut pane = SplitPane::default();
        pane.pointer_moved(900.0, 0.0, 1000.0);
        assert_eq!(pane.left_percent(), 50.0);

        pane.press();
        pane.pointer_moved(900.0, 0.0, 1000.0);
        assert_eq!(pane.left_percent(), SPLIT_MAX);
        pane.pointer_moved(50.0, 0.0, 1000.0);
        assert_eq!(pane.left_percent(), SPLIT_MIN);
        pane.pointer_moved(400.0, 100.0, 1000.0);
        assert!((pane.left_percent() - 30.0).abs() < 1e-9);

        pane.release();
        pane.pointer_moved(700.0, 0.0, 1000.0);
        assert!((pane.left_percent() - 30.0).abs() < 1e-9);
        assert!(!pane.is_dragging());
    }
}
