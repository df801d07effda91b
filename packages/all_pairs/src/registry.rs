use std::fmt;
use std::num::NonZero;
use std::sync::Arc;

use foldhash::{HashMap, HashMapExt};

use crate::kernels::{Access, Delivery, FlagExchange, GlobalGet, MessageExchange, RemoteAccess};
use crate::{Endpoint, Error, MeasurementKernel};

/// Creates a kernel bound to one member's endpoint, running the given number of inner repeats
/// per call.
pub type KernelFactory = Arc<
    dyn for<'e> Fn(&'e Endpoint, NonZero<u32>) -> Box<dyn MeasurementKernel + 'e> + Send + Sync,
>;

/// Maps kernel names to the factories that create them.
///
/// # Example
///
/// ```
/// use all_pairs::KernelRegistry;
///
/// let registry = KernelRegistry::builtin();
/// let (kernels, unknown) = registry.resolve(["mpi_sync,mpi_async", "bogus"]);
///
/// assert_eq!(kernels.len(), 2);
/// assert_eq!(kernels[0].name(), "mpi_sync");
/// assert_eq!(unknown.len(), 1);
/// ```
#[derive(Clone)]
pub struct KernelRegistry {
    factories: HashMap<String, KernelFactory>,
}

impl KernelRegistry {
    /// A registry without any kernels.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with the built-in kernels: `def`, `mpi_rma_get`, `mpi_rma_put`, `mpi_sync`,
    /// `mpi_async` and `dash_get`.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();

        registry.register("def", flag_exchange);
        registry.register("mpi_rma_get", rma_get);
        registry.register("mpi_rma_put", rma_put);
        registry.register("mpi_sync", sync_exchange);
        registry.register("mpi_async", async_exchange);
        registry.register("dash_get", global_get);

        registry
    }

    /// Registers a kernel, replacing any kernel already registered under the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: for<'e> Fn(&'e Endpoint, NonZero<u32>) -> Box<dyn MeasurementKernel + 'e>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// The registered kernel names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolves requested kernel names, each of which may be a comma-separated list.
    ///
    /// Returns the resolved kernels in request order and an [`Error::UnknownKernel`] for every
    /// name that is not registered. Empty names are ignored.
    pub fn resolve<I>(&self, requested: I) -> (Vec<ResolvedKernel>, Vec<Error>)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut resolved = Vec::new();
        let mut unknown = Vec::new();

        for list in requested {
            for name in list.as_ref().split(',').map(str::trim) {
                if name.is_empty() {
                    continue;
                }

                match self.factories.get(name) {
                    Some(factory) => resolved.push(ResolvedKernel {
                        name: name.to_owned(),
                        factory: Arc::clone(factory),
                    }),
                    None => unknown.push(Error::UnknownKernel {
                        name: name.to_owned(),
                    }),
                }
            }
        }

        (resolved, unknown)
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// A kernel name that was found in a [`KernelRegistry`], ready to be instantiated by every
/// group member.
#[derive(Clone)]
pub struct ResolvedKernel {
    name: String,
    factory: KernelFactory,
}

impl ResolvedKernel {
    /// The name the kernel was requested by.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates an instance of the kernel bound to `endpoint`.
    #[must_use]
    pub fn instantiate<'e>(
        &self,
        endpoint: &'e Endpoint,
        inner_repeats: NonZero<u32>,
    ) -> Box<dyn MeasurementKernel + 'e> {
        (self.factory)(endpoint, inner_repeats)
    }
}

impl fmt::Debug for ResolvedKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedKernel")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn flag_exchange(
    endpoint: &Endpoint,
    inner_repeats: NonZero<u32>,
) -> Box<dyn MeasurementKernel + '_> {
    Box::new(FlagExchange::new(endpoint, inner_repeats))
}

fn rma_get(endpoint: &Endpoint, inner_repeats: NonZero<u32>) -> Box<dyn MeasurementKernel + '_> {
    Box::new(RemoteAccess::new(endpoint, inner_repeats, Access::Get))
}

fn rma_put(endpoint: &Endpoint, inner_repeats: NonZero<u32>) -> Box<dyn MeasurementKernel + '_> {
    Box::new(RemoteAccess::new(endpoint, inner_repeats, Access::Put))
}

fn sync_exchange(
    endpoint: &Endpoint,
    inner_repeats: NonZero<u32>,
) -> Box<dyn MeasurementKernel + '_> {
    Box::new(MessageExchange::new(
        endpoint,
        inner_repeats,
        Delivery::Synchronous,
    ))
}

fn async_exchange(
    endpoint: &Endpoint,
    inner_repeats: NonZero<u32>,
) -> Box<dyn MeasurementKernel + '_> {
    Box::new(MessageExchange::new(
        endpoint,
        inner_repeats,
        Delivery::Buffered,
    ))
}

fn global_get(endpoint: &Endpoint, inner_repeats: NonZero<u32>) -> Box<dyn MeasurementKernel + '_> {
    Box::new(GlobalGet::new(endpoint, inner_repeats))
}
