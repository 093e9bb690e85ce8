use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use once_cell::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::errors::{panic_message, CorrectionError};
use super::text_utils::TextUtils;

/// A loaded generation model: prompt in, corrected text out.
///
/// Implementations are immutable once built and may be called from many threads.
#[cfg_attr(test, mockall::automock)]
pub trait CorrectionModel: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, CorrectionError>;
}

/// The slow, blocking operation that produces the model
pub trait ModelLoader: Send + 'static {
    fn load(&self) -> Result<Arc<dyn CorrectionModel>, CorrectionError>;
}

impl<F> ModelLoader for F
where
    F: Fn() -> Result<Arc<dyn CorrectionModel>, CorrectionError> + Send + 'static,
{
    fn load(&self) -> Result<Arc<dyn CorrectionModel>, CorrectionError> {
        self()
    }
}

/// Readiness of the grammar model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelState {
    Loading,
    Ready,
    Failed(String),
}

impl ModelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelState::Loading => "loading",
            ModelState::Ready => "ready",
            ModelState::Failed(_) => "failed",
        }
    }
}

/// Outcome of a single correction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectionResult {
    Loading,
    Error(String),
    Success(String),
}

/// Written exactly once by the loader thread.
type Published = Result<Arc<dyn CorrectionModel>, String>;

struct Shared {
    model_name: String,
    prompt_template: String,
    slot: OnceCell<Published>,
}

impl Shared {
    fn publish(&self, outcome: Published) {
        if self.slot.set(outcome).is_err() {
            warn!("⚠️ Model state already settled, ignoring second publish");
        }
    }
}

/// Grammar corrector backed by a model that loads in the background.
///
/// Cloning is cheap and every clone observes the same model state. Calls made
/// before the load finishes return [`CorrectionResult::Loading`] immediately.
#[derive(Clone)]
pub struct GrammarCorrector {
    shared: Arc<Shared>,
}

impl GrammarCorrector {
    /// Start loading on a dedicated thread and return straight away
    pub fn spawn<L: ModelLoader>(
        model_name: impl Into<String>,
        prompt_template: impl Into<String>,
        loader: L,
    ) -> Self {
        let corrector = Self {
            shared: Arc::new(Shared {
                model_name: model_name.into(),
                prompt_template: prompt_template.into(),
                slot: OnceCell::new(),
            }),
        };

        let shared = Arc::clone(&corrector.shared);
        let spawned = thread::Builder::new()
            .name("model-loader".to_string())
            .spawn(move || {
                let outcome = run_loader(&shared.model_name, &loader);
                shared.publish(outcome);
            });

        if let Err(e) = spawned {
            error!("❌ Could not start model loader thread: {}", e);
            corrector
                .shared
                .publish(Err(format!("could not start loader thread: {}", e)));
        }

        corrector
    }

    pub fn model_name(&self) -> &str {
        &self.shared.model_name
    }

    pub fn state(&self) -> ModelState {
        match self.shared.slot.get() {
            None => ModelState::Loading,
            Some(Ok(_)) => ModelState::Ready,
            Some(Err(reason)) => ModelState::Failed(reason.clone()),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.shared.slot.get().is_none()
    }

    pub fn build_prompt(&self, sentence: &str) -> String {
        TextUtils::build_prompt(&self.shared.prompt_template, sentence)
    }

    /// Correct one sentence. Never blocks on the model load.
    pub fn correct(&self, sentence: &str) -> CorrectionResult {
        let model = match self.shared.slot.get() {
            None => return CorrectionResult::Loading,
            Some(Err(reason)) => {
                return CorrectionResult::Error(format!("Error loading model: {}", reason))
            }
            Some(Ok(model)) => model,
        };

        if TextUtils::is_blank(sentence) {
            return CorrectionResult::Success(String::new());
        }

        let prompt = self.build_prompt(sentence);
        debug!("🔧 Correcting: '{}'", sentence);
        let started = Instant::now();

        match panic::catch_unwind(AssertUnwindSafe(|| model.generate(&prompt))) {
            Ok(Ok(corrected)) => {
                debug!("✅ Corrected in {:?}: '{}'", started.elapsed(), corrected);
                CorrectionResult::Success(corrected)
            }
            Ok(Err(e)) => {
                warn!("⚠️ Correction failed: {}", e);
                CorrectionResult::Error(e.to_string())
            }
            Err(payload) => {
                let details = panic_message(payload.as_ref());
                error!("❌ Inference panicked: {}", details);
                CorrectionResult::Error(
                    CorrectionError::InferenceFailed {
                        details: format!("panic during generation: {}", details),
                    }
                    .to_string(),
                )
            }
        }
    }
}

fn run_loader<L: ModelLoader>(model_name: &str, loader: &L) -> Published {
    info!("🧠 Loading grammar model: {}", model_name);
    let started = Instant::now();

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| loader.load())) {
        Ok(result) => result,
        Err(payload) => Err(CorrectionError::LoaderPanicked {
            details: panic_message(payload.as_ref()),
        }),
    };

    match outcome {
        Ok(model) => {
            info!("✅ Model {} ready in {:?}", model_name, started.elapsed());
            Ok(model)
        }
        Err(e) => {
            error!("❌ Failed to load model {}: {}", model_name, e);
            Err(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    const TEMPLATE: &str = "Correct: '{sentence}'";

    type Outcome = Result<Arc<dyn CorrectionModel>, CorrectionError>;

    /// Corrector whose load finishes only when the test sends an outcome
    fn gated_corrector() -> (mpsc::Sender<Outcome>, GrammarCorrector) {
        let (tx, rx) = mpsc::channel::<Outcome>();
        let corrector = GrammarCorrector::spawn("test/model", TEMPLATE, move || {
            rx.recv().unwrap_or_else(|_| {
                Err(CorrectionError::ModelLoadFailed {
                    model: "test/model".to_string(),
                    details: "gate dropped".to_string(),
                })
            })
        });
        (tx, corrector)
    }

    fn wait_until_settled(corrector: &GrammarCorrector) -> ModelState {
        let deadline = Instant::now() + Duration::from_secs(5);
        while corrector.is_loading() {
            assert!(Instant::now() < deadline, "model never left the loading state");
            thread::sleep(Duration::from_millis(5));
        }
        corrector.state()
    }

    fn ready_with(model: MockCorrectionModel) -> GrammarCorrector {
        let model: Arc<dyn CorrectionModel> = Arc::new(model);
        let corrector =
            GrammarCorrector::spawn("test/model", TEMPLATE, move || -> Outcome { Ok(Arc::clone(&model)) });
        assert_eq!(wait_until_settled(&corrector), ModelState::Ready);
        corrector
    }

    #[test]
    fn test_starts_in_loading_state() {
        let (tx, corrector) = gated_corrector();

        assert_eq!(corrector.state(), ModelState::Loading);
        assert_eq!(corrector.correct("Yo va al tienda."), CorrectionResult::Loading);

        let mut model = MockCorrectionModel::new();
        model.expect_generate().returning(|_| Ok("Yo voy a la tienda.".to_string()));
        tx.send(Ok(Arc::new(model))).unwrap();

        assert_eq!(wait_until_settled(&corrector), ModelState::Ready);
        assert_eq!(
            corrector.correct("Yo va al tienda."),
            CorrectionResult::Success("Yo voy a la tienda.".to_string())
        );
    }

    #[test]
    fn test_concurrent_calls_while_loading_never_block() {
        let (tx, corrector) = gated_corrector();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let corrector = corrector.clone();
                thread::spawn(move || {
                    (0..50)
                        .map(|_| {
                            let started = Instant::now();
                            let result = corrector.correct("probe");
                            (result, started.elapsed())
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            for (result, elapsed) in handle.join().unwrap() {
                assert_eq!(result, CorrectionResult::Loading);
                assert!(elapsed < Duration::from_secs(1));
            }
        }

        drop(tx);
        assert!(matches!(wait_until_settled(&corrector), ModelState::Failed(_)));
    }

    #[test]
    fn test_blank_sentence_skips_generation() {
        let mut model = MockCorrectionModel::new();
        model.expect_generate().times(0);
        let corrector = ready_with(model);

        for blank in ["", " ", "\t\n", "   \r\n  "] {
            assert_eq!(corrector.correct(blank), CorrectionResult::Success(String::new()));
        }
    }

    #[test]
    fn test_sentence_is_wrapped_in_prompt() {
        let mut model = MockCorrectionModel::new();
        model
            .expect_generate()
            .withf(|prompt| prompt == "Correct: 'El rapid zorro.'")
            .times(1)
            .returning(|_| Ok("El rápido zorro.".to_string()));
        let corrector = ready_with(model);

        assert_eq!(
            corrector.correct("El rapid zorro."),
            CorrectionResult::Success("El rápido zorro.".to_string())
        );
    }

    #[test]
    fn test_load_failure_is_permanent() {
        let corrector = GrammarCorrector::spawn("test/model", TEMPLATE, || -> Outcome {
            Err(CorrectionError::ArtifactFetchFailed {
                model: "test/model".to_string(),
                file: "config.json".to_string(),
                details: "connection refused".to_string(),
            })
        });

        let state = wait_until_settled(&corrector);
        match &state {
            ModelState::Failed(reason) => {
                assert!(!reason.is_empty());
                assert!(reason.contains("connection refused"));
            }
            other => panic!("Expected Failed, got {other:?}"),
        }

        for _ in 0..10 {
            match corrector.correct("hola") {
                CorrectionResult::Error(message) => assert!(message.contains("connection refused")),
                other => panic!("Expected Error, got {other:?}"),
            }
            assert_eq!(corrector.state(), state);
        }
    }

    #[test]
    fn test_loader_panic_becomes_failed_state() {
        let corrector = GrammarCorrector::spawn("test/model", TEMPLATE, || -> Outcome {
            panic!("out of memory while mapping weights")
        });

        match wait_until_settled(&corrector) {
            ModelState::Failed(reason) => assert!(reason.contains("out of memory")),
            other => panic!("Expected Failed, got {other:?}"),
        }
        assert!(matches!(corrector.correct("hola"), CorrectionResult::Error(_)));
    }

    #[test]
    fn test_inference_failure_only_affects_that_call() {
        let mut model = MockCorrectionModel::new();
        model.expect_generate().returning(|prompt| {
            if prompt.contains("\u{fffd}") {
                Err(CorrectionError::TokenizationFailed {
                    details: "malformed input".to_string(),
                })
            } else {
                Ok("Hola.".to_string())
            }
        });
        let corrector = ready_with(model);

        match corrector.correct("\u{fffd}\u{fffd}") {
            CorrectionResult::Error(message) => assert!(message.contains("malformed input")),
            other => panic!("Expected Error, got {other:?}"),
        }
        assert_eq!(corrector.state(), ModelState::Ready);
        assert_eq!(corrector.correct("Hola."), CorrectionResult::Success("Hola.".to_string()));
    }

    #[test]
    fn test_inference_panic_is_caught() {
        struct Exploding;
        impl CorrectionModel for Exploding {
            fn generate(&self, _prompt: &str) -> Result<String, CorrectionError> {
                panic!("index out of bounds")
            }
        }

        let corrector = GrammarCorrector::spawn("test/model", TEMPLATE, || -> Outcome {
            Ok(Arc::new(Exploding))
        });
        wait_until_settled(&corrector);

        match corrector.correct("hola") {
            CorrectionResult::Error(message) => assert!(message.contains("index out of bounds")),
            other => panic!("Expected Error, got {other:?}"),
        }
        assert_eq!(corrector.state(), ModelState::Ready);
    }

    #[test]
    fn test_terminal_state_ignores_second_publish() {
        let mut model = MockCorrectionModel::new();
        model.expect_generate().returning(|_| Ok("ok".to_string()));
        let corrector = ready_with(model);

        corrector.shared.publish(Err("late failure".to_string()));

        assert_eq!(corrector.state(), ModelState::Ready);
        assert_eq!(corrector.correct("x"), CorrectionResult::Success("ok".to_string()));
    }

    #[test]
    fn test_clones_share_state() {
        let (tx, corrector) = gated_corrector();
        let other = corrector.clone();
        assert_eq!(other.model_name(), "test/model");

        tx.send(Err(CorrectionError::ModelNotFound {
            path: "/models/config.json".to_string(),
        }))
        .unwrap();

        wait_until_settled(&corrector);
        assert_eq!(other.state(), corrector.state());
        assert_eq!(other.state().as_str(), "failed");
    }
}
