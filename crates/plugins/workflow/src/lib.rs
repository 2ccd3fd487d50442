//! Pull-request workflow for prflow.
//!
//! One `pr` call runs a fixed sequence of steps against an instance:
//!
//! - **Create**: open the pull request (the only step that can fail the call)
//! - **Review**: mark it reviewed, when `auto_review` is set
//! - **Test**: mark it tested, when `auto_test` is set
//! - **Merge**: merge it, when `auto_merge` is set and the merge gate allows
//!
//! Review, test and merge are isolated: a failure is logged and recorded as a
//! [`StepOutcome::Failed`] without stopping the steps after it.
//!
//! # Example
//!
//! ```ignore
//! use prflow_workflow::{PrOutcome, Workflow};
//!
//! let workflow = Workflow::new(upstream, tokens);
//! match workflow.run_pr(&instance, Some("Fix login"), None, false).await? {
//!     PrOutcome::Completed(result) => println!("{}", result.to_value()),
//!     PrOutcome::Failed { error, .. } => eprintln!("create failed: {error}"),
//! }
//! ```

pub mod input;

pub use input::{coerce_draft, filter_labels, prepare, split_list, PreparedPull};

use std::sync::Arc;

use prflow_core::{Error, Instance, Result, Upstream};
use prflow_storage::TokenCache;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Steps of the workflow, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Create,
    Review,
    Test,
    Merge,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Create => "create",
            Step::Review => "review",
            Step::Test => "test",
            Step::Merge => "merge",
        }
    }
}

/// Outcome of one optional step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The upstream call succeeded; `None` when it answered with an empty body
    Completed(Option<Value>),
    /// The step did not run
    Skipped(String),
    /// The upstream call failed
    Failed(String),
}

impl StepOutcome {
    /// Whether the step ran and succeeded, regardless of body.
    pub fn succeeded(&self) -> bool {
        matches!(self, StepOutcome::Completed(_))
    }

    /// Response body, if the step succeeded with one.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            StepOutcome::Completed(body) => body.as_ref(),
            _ => None,
        }
    }

    fn report(&self) -> Value {
        match self {
            StepOutcome::Completed(_) => json!({"status": "ok"}),
            StepOutcome::Skipped(reason) => json!({"status": "skipped", "reason": reason}),
            StepOutcome::Failed(error) => json!({"status": "failed", "error": error}),
        }
    }
}

/// Merge gate: merge when tests are not part of the workflow, or when the
/// test step succeeded.
pub fn should_merge(auto_test: bool, test: &StepOutcome) -> bool {
    !auto_test || test.succeeded()
}

/// Result of a `pr` call whose create step succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowResult {
    /// Created pull request as returned upstream (`null` for an empty body)
    pub pr: Value,
    pub review: StepOutcome,
    pub test: StepOutcome,
    pub merge: StepOutcome,
    pub warnings: Vec<String>,
}

impl WorkflowResult {
    /// JSON payload returned to the caller.
    ///
    /// `review`, `test` and `merge` are `null` unless the step succeeded with a
    /// body; `steps` says what actually happened.
    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "success": true,
            "pr": self.pr,
            "review": self.review.payload(),
            "test": self.test.payload(),
            "merge": self.merge.payload(),
            "steps": {
                "review": self.review.report(),
                "test": self.test.report(),
                "merge": self.merge.report(),
            },
        });
        if !self.warnings.is_empty() {
            value["warnings"] = json!(self.warnings);
        }
        value
    }
}

/// Outcome of a `pr` call that passed validation.
#[derive(Debug)]
pub enum PrOutcome {
    Completed(WorkflowResult),
    /// Create failed; nothing else ran
    Failed { stage: Step, error: Error },
}

impl PrOutcome {
    /// JSON payload returned to the caller.
    pub fn to_value(&self) -> Value {
        match self {
            PrOutcome::Completed(result) => result.to_value(),
            PrOutcome::Failed { stage, error } => {
                let mut value = json!({
                    "success": false,
                    "stage": stage.as_str(),
                    "error": error.to_string(),
                });
                if let Some(status) = error.status() {
                    value["status"] = json!(status);
                }
                value
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, PrOutcome::Failed { .. })
    }
}

/// Runs the create → review → test → merge sequence.
pub struct Workflow {
    upstream: Arc<dyn Upstream>,
    tokens: Arc<TokenCache>,
}

impl Workflow {
    pub fn new(upstream: Arc<dyn Upstream>, tokens: Arc<TokenCache>) -> Self {
        Self { upstream, tokens }
    }

    /// Run the workflow for one instance.
    ///
    /// Returns `Err` only for invalid input, before anything is sent upstream.
    /// A failed create is reported as [`PrOutcome::Failed`].
    pub async fn run_pr(
        &self,
        instance: &Instance,
        title: Option<&str>,
        body: Option<&str>,
        draft: bool,
    ) -> Result<PrOutcome> {
        let PreparedPull { request, warnings } = prepare(instance, title, body, draft)?;
        for warning in &warnings {
            warn!(instance = %instance.key, "{}", warning);
        }

        info!(
            instance = %instance.key,
            head = %request.head,
            base = %request.base,
            draft = request.draft,
            "Creating pull request"
        );

        let created = match self.create(instance, &request).await {
            Ok(created) => created,
            Err(e) => {
                warn!(instance = %instance.key, error = %e, "Pull request creation failed");
                return Ok(PrOutcome::Failed {
                    stage: Step::Create,
                    error: e,
                });
            }
        };

        let number = created.as_ref().and_then(pr_number);
        match number {
            Some(number) => info!(instance = %instance.key, number, "Pull request created"),
            None => warn!(
                instance = %instance.key,
                "Create response carried no pull request number, follow-up steps skipped"
            ),
        }

        let review = match (instance.auto_review, number) {
            (false, _) => StepOutcome::Skipped("auto_review disabled".to_string()),
            (true, None) => StepOutcome::Skipped("no pull request number".to_string()),
            (true, Some(number)) => {
                let result = self.review(instance, number).await;
                settle(instance, Step::Review, result)
            }
        };

        let test = match (instance.auto_test, number) {
            (false, _) => StepOutcome::Skipped("auto_test disabled".to_string()),
            (true, None) => StepOutcome::Skipped("no pull request number".to_string()),
            (true, Some(number)) => {
                let result = self.test(instance, number).await;
                settle(instance, Step::Test, result)
            }
        };

        let merge = match (instance.auto_merge, number) {
            (false, _) => StepOutcome::Skipped("auto_merge disabled".to_string()),
            (true, None) => StepOutcome::Skipped("no pull request number".to_string()),
            (true, Some(_)) if !should_merge(instance.auto_test, &test) => {
                info!(instance = %instance.key, "Test step did not succeed, merge skipped");
                StepOutcome::Skipped("test step did not succeed".to_string())
            }
            (true, Some(number)) => {
                let result = self.merge(instance, number).await;
                settle(instance, Step::Merge, result)
            }
        };

        Ok(PrOutcome::Completed(WorkflowResult {
            pr: created.unwrap_or(Value::Null),
            review,
            test,
            merge,
            warnings,
        }))
    }

    async fn create(
        &self,
        instance: &Instance,
        request: &prflow_core::CreatePullRequest,
    ) -> Result<Option<Value>> {
        let token = self.tokens.get_token(instance).await?;
        let result = self.upstream.create_pull(instance, &token, request).await;
        self.forget_rejected(instance, result)
    }

    async fn review(&self, instance: &Instance, number: u64) -> Result<Option<Value>> {
        let token = self.tokens.get_token(instance).await?;
        let result = self
            .upstream
            .review_pull(instance, &token, number, false)
            .await;
        self.forget_rejected(instance, result)
    }

    async fn test(&self, instance: &Instance, number: u64) -> Result<Option<Value>> {
        let token = self.tokens.get_token(instance).await?;
        let result = self.upstream.test_pull(instance, &token, number, false).await;
        self.forget_rejected(instance, result)
    }

    async fn merge(&self, instance: &Instance, number: u64) -> Result<Option<Value>> {
        let token = self.tokens.get_token(instance).await?;
        let result = self.upstream.merge_pull(instance, &token, number).await;
        self.forget_rejected(instance, result)
    }

    /// A 401 means the cached token is no longer accepted; drop it so the
    /// next call exchanges a fresh one.
    fn forget_rejected<T>(&self, instance: &Instance, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.status() == Some(401) {
                self.tokens.invalidate(&instance.key);
            }
        }
        result
    }
}

/// Turn a step's upstream result into an outcome, logging failures.
fn settle(instance: &Instance, step: Step, result: Result<Option<Value>>) -> StepOutcome {
    match result {
        Ok(body) => {
            debug!(instance = %instance.key, step = step.as_str(), "Step completed");
            StepOutcome::Completed(body)
        }
        Err(e) => {
            warn!(
                instance = %instance.key,
                step = step.as_str(),
                error = %e,
                "Step failed"
            );
            StepOutcome::Failed(e.to_string())
        }
    }
}

/// Pull request number from a create response.
fn pr_number(created: &Value) -> Option<u64> {
    match created.get("number")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use prflow_core::{AccessToken, CreatePullRequest, Credentials};

    mock! {
        pub Gitee {}

        #[async_trait]
        impl Upstream for Gitee {
            async fn exchange_token(&self, credentials: &Credentials) -> Result<AccessToken>;
            async fn create_pull(
                &self,
                instance: &Instance,
                token: &str,
                request: &CreatePullRequest,
            ) -> Result<Option<Value>>;
            async fn review_pull(
                &self,
                instance: &Instance,
                token: &str,
                number: u64,
                force: bool,
            ) -> Result<Option<Value>>;
            async fn test_pull(
                &self,
                instance: &Instance,
                token: &str,
                number: u64,
                force: bool,
            ) -> Result<Option<Value>>;
            async fn merge_pull(
                &self,
                instance: &Instance,
                token: &str,
                number: u64,
            ) -> Result<Option<Value>>;
        }
    }

    fn instance(auto_review: bool, auto_test: bool, auto_merge: bool) -> Instance {
        Instance::new(
            "acme",
            "web",
            "dev",
            "master",
            Credentials::new("bot", "pw", "cid", "cs"),
        )
        .with_flags(auto_review, auto_test, auto_merge)
    }

    fn expect_token(mock: &mut MockGitee) {
        mock.expect_exchange_token().times(1).returning(|_| {
            Ok(AccessToken {
                access_token: "tok-1".to_string(),
                expires_in: Some(3600),
            })
        });
    }

    fn expect_create(mock: &mut MockGitee) {
        mock.expect_create_pull()
            .times(1)
            .returning(|_, _, _| Ok(Some(json!({"number": 12, "title": "Fix login"}))));
    }

    fn workflow(mock: MockGitee) -> Workflow {
        let upstream: Arc<dyn Upstream> = Arc::new(mock);
        let tokens = Arc::new(TokenCache::new(upstream.clone()));
        Workflow::new(upstream, tokens)
    }

    fn completed(outcome: PrOutcome) -> WorkflowResult {
        match outcome {
            PrOutcome::Completed(result) => result,
            PrOutcome::Failed { error, .. } => panic!("workflow failed: {error}"),
        }
    }

    #[test]
    fn test_should_merge_gate() {
        let ok_empty = StepOutcome::Completed(None);
        let ok_body = StepOutcome::Completed(Some(json!({})));
        let failed = StepOutcome::Failed("500".to_string());
        let skipped = StepOutcome::Skipped("auto_test disabled".to_string());

        assert!(should_merge(false, &skipped));
        assert!(should_merge(false, &failed));
        assert!(should_merge(true, &ok_empty));
        assert!(should_merge(true, &ok_body));
        assert!(!should_merge(true, &failed));
        assert!(!should_merge(true, &skipped));
    }

    #[test]
    fn test_pr_number() {
        assert_eq!(pr_number(&json!({"number": 7})), Some(7));
        assert_eq!(pr_number(&json!({"number": "8"})), Some(8));
        assert_eq!(pr_number(&json!({"number": -1})), None);
        assert_eq!(pr_number(&json!({"id": 1})), None);
    }

    #[tokio::test]
    async fn test_blank_title_makes_no_upstream_call() {
        let workflow = workflow(MockGitee::new());

        for title in [None, Some(""), Some("   ")] {
            let err = workflow
                .run_pr(&instance(true, true, true), title, None, false)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
    }

    #[tokio::test]
    async fn test_create_only_sends_raw_branches() {
        let mut mock = MockGitee::new();
        expect_token(&mut mock);
        mock.expect_create_pull()
            .withf(|instance, token, request| {
                instance.key == "web"
                    && token.to_string() == "tok-1"
                    && request.head == "dev"
                    && request.base == "master"
                    && request.title == "Fix login"
                    && request.body.is_empty()
                    && request.draft
                    && request.labels == Some(vec!["bug".to_string()])
            })
            .times(1)
            .returning(|_, _, _| Ok(Some(json!({"number": 12}))));

        let mut instance = instance(false, false, false);
        instance.labels = Some("bug,x".to_string());

        let result = completed(
            workflow(mock)
                .run_pr(&instance, Some(" Fix login "), None, true)
                .await
                .unwrap(),
        );

        assert_eq!(result.pr["number"], 12);
        assert!(matches!(result.review, StepOutcome::Skipped(_)));
        assert!(matches!(result.test, StepOutcome::Skipped(_)));
        assert!(matches!(result.merge, StepOutcome::Skipped(_)));
        assert_eq!(result.warnings.len(), 1);

        let value = result.to_value();
        assert_eq!(value["success"], true);
        assert!(value["review"].is_null());
        assert!(value["merge"].is_null());
        assert_eq!(value["steps"]["merge"]["status"], "skipped");
        assert_eq!(value["warnings"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_merge_runs_unconditionally_without_auto_test() {
        let mut mock = MockGitee::new();
        expect_token(&mut mock);
        expect_create(&mut mock);
        mock.expect_review_pull()
            .withf(|_, _, number, force| *number == 12 && !*force)
            .times(1)
            .returning(|_, _, _, _| Ok(None));
        mock.expect_test_pull().times(0);
        mock.expect_merge_pull()
            .withf(|_, _, number| *number == 12)
            .times(1)
            .returning(|_, _, _| Ok(Some(json!({"merged": true}))));

        let result = completed(
            workflow(mock)
                .run_pr(&instance(true, false, true), Some("Fix login"), None, false)
                .await
                .unwrap(),
        );

        assert_eq!(result.review, StepOutcome::Completed(None));
        assert_eq!(result.merge.payload(), Some(&json!({"merged": true})));
        // The token is fetched once and reused by every step.
    }

    #[tokio::test]
    async fn test_failed_test_step_skips_merge() {
        let mut mock = MockGitee::new();
        expect_token(&mut mock);
        expect_create(&mut mock);
        mock.expect_test_pull()
            .times(1)
            .returning(|_, _, _, _| Err(Error::from_status(500, "CI unavailable")));
        mock.expect_merge_pull().times(0);

        let result = completed(
            workflow(mock)
                .run_pr(&instance(false, true, true), Some("Fix login"), None, false)
                .await
                .unwrap(),
        );

        assert!(matches!(&result.test, StepOutcome::Failed(msg) if msg.contains("CI unavailable")));
        assert!(matches!(&result.merge, StepOutcome::Skipped(reason) if reason.contains("test")));

        let value = result.to_value();
        assert!(value["test"].is_null());
        assert_eq!(value["steps"]["test"]["status"], "failed");
        assert_eq!(value["steps"]["merge"]["status"], "skipped");
    }

    #[tokio::test]
    async fn test_empty_test_body_still_allows_merge() {
        let mut mock = MockGitee::new();
        expect_token(&mut mock);
        expect_create(&mut mock);
        mock.expect_test_pull()
            .withf(|_, _, number, force| *number == 12 && !*force)
            .times(1)
            .returning(|_, _, _, _| Ok(None));
        mock.expect_merge_pull()
            .times(1)
            .returning(|_, _, _| Ok(None));

        let result = completed(
            workflow(mock)
                .run_pr(&instance(false, true, true), Some("Fix login"), None, false)
                .await
                .unwrap(),
        );

        assert_eq!(result.test, StepOutcome::Completed(None));
        assert_eq!(result.merge, StepOutcome::Completed(None));
        let value = result.to_value();
        assert!(value["test"].is_null());
        assert_eq!(value["steps"]["test"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_review_failure_does_not_block_later_steps() {
        let mut mock = MockGitee::new();
        expect_token(&mut mock);
        expect_create(&mut mock);
        mock.expect_review_pull()
            .times(1)
            .returning(|_, _, _, _| Err(Error::from_status(403, "not a reviewer")));
        mock.expect_test_pull()
            .times(1)
            .returning(|_, _, _, _| Ok(Some(json!({"tested": true}))));
        mock.expect_merge_pull()
            .times(1)
            .returning(|_, _, _| Ok(Some(json!({"merged": true}))));

        let result = completed(
            workflow(mock)
                .run_pr(&instance(true, true, true), Some("Fix login"), None, false)
                .await
                .unwrap(),
        );

        assert!(matches!(result.review, StepOutcome::Failed(_)));
        assert!(result.test.succeeded());
        assert!(result.merge.succeeded());
    }

    #[tokio::test]
    async fn test_merge_failure_is_recorded() {
        let mut mock = MockGitee::new();
        expect_token(&mut mock);
        expect_create(&mut mock);
        mock.expect_merge_pull()
            .times(1)
            .returning(|_, _, _| Err(Error::from_status(405, "conflict")));

        let outcome = workflow(mock)
            .run_pr(&instance(false, false, true), Some("Fix login"), None, false)
            .await
            .unwrap();

        assert!(!outcome.is_failure());
        let value = outcome.to_value();
        assert_eq!(value["success"], true);
        assert!(value["merge"].is_null());
        assert_eq!(value["steps"]["merge"]["status"], "failed");
    }

    #[tokio::test]
    async fn test_create_failure_stops_workflow() {
        let mut mock = MockGitee::new();
        expect_token(&mut mock);
        mock.expect_create_pull()
            .times(1)
            .returning(|_, _, _| Err(Error::from_status(422, "branch does not exist")));
        mock.expect_review_pull().times(0);
        mock.expect_test_pull().times(0);
        mock.expect_merge_pull().times(0);

        let outcome = workflow(mock)
            .run_pr(&instance(true, true, true), Some("Fix login"), None, false)
            .await
            .unwrap();

        assert!(outcome.is_failure());
        let value = outcome.to_value();
        assert_eq!(value["success"], false);
        assert_eq!(value["stage"], "create");
        assert_eq!(value["status"], 422);
        assert!(value["error"].as_str().unwrap().contains("branch does not exist"));
    }

    #[tokio::test]
    async fn test_token_failure_fails_create() {
        let mut mock = MockGitee::new();
        mock.expect_exchange_token()
            .times(1)
            .returning(|_| Err(Error::from_status(401, "invalid_grant")));
        mock.expect_create_pull().times(0);

        let outcome = workflow(mock)
            .run_pr(&instance(true, true, true), Some("Fix login"), None, false)
            .await
            .unwrap();

        match outcome {
            PrOutcome::Failed { stage, error } => {
                assert_eq!(stage, Step::Create);
                assert_eq!(error.status(), Some(401));
            }
            PrOutcome::Completed(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_rejected_token_is_exchanged_again() {
        let mut mock = MockGitee::new();
        let mut exchanges = 0;
        mock.expect_exchange_token().times(2).returning(move |_| {
            exchanges += 1;
            Ok(AccessToken {
                access_token: format!("tok-{}", exchanges),
                expires_in: Some(3600),
            })
        });
        mock.expect_create_pull()
            .times(2)
            .returning(|_, token, _| match token {
                "tok-1" => Err(Error::from_status(401, "token revoked")),
                _ => Ok(Some(json!({"number": 12}))),
            });

        let workflow = workflow(mock);
        let first = workflow
            .run_pr(&instance(false, false, false), Some("Fix login"), None, false)
            .await
            .unwrap();
        assert!(first.is_failure());

        let second = workflow
            .run_pr(&instance(false, false, false), Some("Fix login"), None, false)
            .await
            .unwrap();
        assert_eq!(completed(second).pr["number"], 12);
    }

    #[tokio::test]
    async fn test_missing_number_skips_follow_up_steps() {
        let mut mock = MockGitee::new();
        expect_token(&mut mock);
        mock.expect_create_pull()
            .times(1)
            .returning(|_, _, _| Ok(None));
        mock.expect_review_pull().times(0);
        mock.expect_merge_pull().times(0);

        let result = completed(
            workflow(mock)
                .run_pr(&instance(true, false, true), Some("Fix login"), None, false)
                .await
                .unwrap(),
        );

        assert!(result.pr.is_null());
        assert!(matches!(&result.review, StepOutcome::Skipped(r) if r.contains("number")));
        assert!(matches!(&result.merge, StepOutcome::Skipped(r) if r.contains("number")));
    }
}
