//! Decoration chains layering cross-cutting behavior onto providers and buses

use parking_lot::Mutex;
use std::sync::Arc;

use crate::bus::CacheBus;
use crate::provider::CachingProvider;
use crate::CacheResult;

/// Lazily constructed instance whose construction failures are retryable.
///
/// Unlike a memoized lazy value, a failed construction attempt leaves the
/// holder uninitialized so the next caller retries; errors are never
/// cached. The first successful construction is kept for the lifetime of
/// the holder.
pub struct LazyHolder<T: ?Sized> {
    init: Box<dyn Fn() -> CacheResult<Arc<T>> + Send + Sync>,
    slot: Mutex<Option<Arc<T>>>,
}

impl<T: ?Sized> LazyHolder<T> {
    pub fn new(init: impl Fn() -> CacheResult<Arc<T>> + Send + Sync + 'static) -> Self {
        Self {
            init: Box::new(init),
            slot: Mutex::new(None),
        }
    }

    /// The held instance, constructing it on first success
    pub fn get(&self) -> CacheResult<Arc<T>> {
        let mut slot = self.slot.lock();
        if let Some(instance) = slot.as_ref() {
            return Ok(Arc::clone(instance));
        }
        let instance = (self.init)()?;
        *slot = Some(Arc::clone(&instance));
        Ok(instance)
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.lock().is_some()
    }
}

/// Produces the undecorated (or partially decorated) provider instance
pub type ProviderFactory = Box<dyn Fn() -> CacheResult<Arc<dyn CachingProvider>> + Send + Sync>;

/// Produces the undecorated (or partially decorated) bus instance
pub type BusFactory = Box<dyn Fn() -> CacheResult<Arc<dyn CacheBus>> + Send + Sync>;

/// Wraps an inner provider factory into an outer one; receives the
/// registered instance name for logging
pub type ProviderDecoration = Box<dyn Fn(&str, ProviderFactory) -> ProviderFactory + Send + Sync>;

/// Wraps an inner bus factory into an outer one
pub type BusDecoration = Box<dyn Fn(&str, BusFactory) -> BusFactory + Send + Sync>;

/// Ordered set of decorations over one named provider.
///
/// Decorations registered later wrap decorations registered earlier: the
/// last registration is outermost and sees calls first. With no
/// decorations the chain degenerates to the plain factory.
pub struct ProviderDecorationChain {
    name: String,
    inner: ProviderFactory,
    decorations: Vec<ProviderDecoration>,
}

impl ProviderDecorationChain {
    pub fn new(name: impl Into<String>, inner: ProviderFactory) -> Self {
        Self {
            name: name.into(),
            inner,
            decorations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn decorate(mut self, decoration: ProviderDecoration) -> Self {
        self.decorations.push(decoration);
        self
    }

    /// Fold the chain into a lazily constructed singleton.
    ///
    /// The full factory chain runs at most once, on first access, never at
    /// registration time; a failed construction is retried on the next
    /// access.
    pub fn build(self) -> DecoratedProvider {
        let Self {
            name,
            inner,
            decorations,
        } = self;

        let mut factory = inner;
        for decoration in decorations {
            factory = decoration(&name, factory);
        }

        DecoratedProvider {
            name,
            holder: LazyHolder::new(move || factory()),
        }
    }
}

/// Lazy singleton produced by [`ProviderDecorationChain::build`]
pub struct DecoratedProvider {
    name: String,
    holder: LazyHolder<dyn CachingProvider>,
}

impl DecoratedProvider {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> CacheResult<Arc<dyn CachingProvider>> {
        self.holder.get()
    }
}

/// Ordered set of decorations over one named bus
pub struct BusDecorationChain {
    name: String,
    inner: BusFactory,
    decorations: Vec<BusDecoration>,
}

impl BusDecorationChain {
    pub fn new(name: impl Into<String>, inner: BusFactory) -> Self {
        Self {
            name: name.into(),
            inner,
            decorations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn decorate(mut self, decoration: BusDecoration) -> Self {
        self.decorations.push(decoration);
        self
    }

    pub fn build(self) -> DecoratedBus {
        let Self {
            name,
            inner,
            decorations,
        } = self;

        let mut factory = inner;
        for decoration in decorations {
            factory = decoration(&name, factory);
        }

        DecoratedBus {
            name,
            holder: LazyHolder::new(move || factory()),
        }
    }
}

/// Lazy singleton produced by [`BusDecorationChain::build`]
pub struct DecoratedBus {
    name: String,
    holder: LazyHolder<dyn CacheBus>,
}

impl DecoratedBus {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> CacheResult<Arc<dyn CacheBus>> {
        self.holder.get()
    }
}
