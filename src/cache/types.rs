//! Typed payloads for each domain namespace.
//!
//! Dashboard and progress bodies are produced by the analytics layer; they are
//! carried here as opaque JSON so this crate does not depend on their layout.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::codec::CachedValue;
use super::key::Namespace;

/// Authenticated session, keyed by user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub user_id: String,
    pub tenant_id: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl CachedValue for SessionData {
    const NAMESPACE: Namespace = Namespace::Session;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewAnswer {
    pub question_id: String,
    pub answer: String,
    pub answered_at: i64,
}

/// Live state of one interview session, keyed by session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewState {
    pub session_id: String,
    pub user_id: String,
    pub interview_type: String,
    pub status: InterviewStatus,
    pub current_question: u32,
    #[serde(default)]
    pub answers: Vec<InterviewAnswer>,
}

impl CachedValue for InterviewState {
    const NAMESPACE: Namespace = Namespace::InterviewState;
}

/// Editor state of a coding exercise, keyed by session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodingSession {
    pub session_id: String,
    pub user_id: String,
    pub problem_id: String,
    pub language: String,
    pub code: String,
    pub last_saved_at: i64,
}

impl CachedValue for CodingSession {
    const NAMESPACE: Namespace = Namespace::CodingSession;
}

/// Outcome of running a submission. Lives next to coding sessions under a
/// content-hash identifier with a short TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodingResult {
    pub passed: u32,
    pub total: u32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub runtime_ms: u64,
}

impl CachedValue for CodingResult {
    const NAMESPACE: Namespace = Namespace::CodingSession;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub user_id: String,
    pub completed_interviews: u32,
    pub average_score: f64,
    pub streak_days: u32,
    #[serde(default)]
    pub by_category: BTreeMap<String, f64>,
}

impl CachedValue for ProgressSnapshot {
    const NAMESPACE: Namespace = Namespace::Progress;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub user_id: String,
    pub generated_at: i64,
    pub body: serde_json::Value,
}

impl CachedValue for DashboardSnapshot {
    const NAMESPACE: Namespace = Namespace::Dashboard;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileData {
    pub user_id: String,
    pub display_name: String,
    pub email: String,
    #[serde(default)]
    pub target_role: Option<String>,
    #[serde(default)]
    pub experience_years: Option<u32>,
}

impl CachedValue for ProfileData {
    const NAMESPACE: Namespace = Namespace::Profile;
}

/// Generated interview feedback, keyed by session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackReport {
    pub session_id: String,
    pub overall_score: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    pub summary: String,
}

impl CachedValue for FeedbackReport {
    const NAMESPACE: Namespace = Namespace::Feedback;
}
