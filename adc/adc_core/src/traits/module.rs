//! Module contracts.
//!
//! Every loadable unit implements [`Lifecycle`]. Providers, utilities,
//! services, middlewares and presets additionally implement [`Component`]
//! and hand out an [`Instance`]; apps implement [`App`] and are run.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;
use crate::types::ModuleKind;

/// The value a component exposes to its dependents.
///
/// Callers downcast to the concrete type they expect, typically through
/// `ModuleContext::get_my_provider_as`.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Cancellation signal passed to `start`, `stop` and `run`.
///
/// Long-running module work should watch the token and wind down once the
/// kernel begins shutting down.
#[derive(Debug, Clone)]
pub struct LifecycleToken {
    receiver: watch::Receiver<bool>,
}

impl LifecycleToken {
    /// A token that is never cancelled.
    pub fn detached() -> Self {
        let (sender, receiver) = watch::channel(false);
        // Keep the value readable after the sender is gone.
        drop(sender);
        Self { receiver }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is requested.
    ///
    /// If the source is dropped without cancelling, this never resolves.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Owner side of a [`LifecycleToken`].
#[derive(Debug)]
pub struct TokenSource {
    sender: watch::Sender<bool>,
}

impl TokenSource {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn token(&self) -> LifecycleToken {
        LifecycleToken {
            receiver: self.sender.subscribe(),
        }
    }

    /// Cancel every token handed out by this source.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for TokenSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Start/stop hooks shared by every module kind.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn start(&self, _token: &LifecycleToken) -> Result<()> {
        Ok(())
    }

    async fn stop(&self, _token: &LifecycleToken) -> Result<()> {
        Ok(())
    }
}

/// A module that exposes an instance to its dependents.
pub trait Component: Lifecycle {
    fn get_instance(&self) -> Instance;
}

/// An entry point. The kernel calls `run` instead of `get_instance`.
#[async_trait]
pub trait App: Lifecycle {
    async fn run(&self, token: &LifecycleToken) -> Result<()>;
}

/// A loaded module, tagged by what it can do.
#[derive(Clone)]
pub enum ModuleHandle {
    Component(Arc<dyn Component>),
    App(Arc<dyn App>),
}

impl ModuleHandle {
    pub fn component(component: impl Component + 'static) -> Self {
        Self::Component(Arc::new(component))
    }

    pub fn app(app: impl App + 'static) -> Self {
        Self::App(Arc::new(app))
    }

    pub fn is_app(&self) -> bool {
        matches!(self, Self::App(_))
    }

    /// Whether this handle has the shape `kind` requires.
    pub fn matches_kind(&self, kind: ModuleKind) -> bool {
        self.is_app() == kind.is_app()
    }

    pub async fn start(&self, token: &LifecycleToken) -> Result<()> {
        match self {
            Self::Component(component) => component.start(token).await,
            Self::App(app) => app.start(token).await,
        }
    }

    pub async fn stop(&self, token: &LifecycleToken) -> Result<()> {
        match self {
            Self::Component(component) => component.stop(token).await,
            Self::App(app) => app.stop(token).await,
        }
    }

    /// The component's instance; `None` for apps.
    pub fn instance(&self) -> Option<Instance> {
        match self {
            Self::Component(component) => Some(component.get_instance()),
            Self::App(_) => None,
        }
    }

    pub fn as_app(&self) -> Option<Arc<dyn App>> {
        match self {
            Self::App(app) => Some(app.clone()),
            Self::Component(_) => None,
        }
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Component(_) => f.write_str("ModuleHandle::Component"),
            Self::App(_) => f.write_str("ModuleHandle::App"),
        }
    }
}
