//! Address-ordered module index.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::OnceCell;
use tracing::{debug, trace, warn};

use super::{parse_debuggable_attribute, DebuggingModes, LoadedModule, MetadataImport, Module, Prefetcher};
use super::{ErrorModule, DEBUGGABLE_ATTRIBUTE};
use crate::config::HeapConfig;
use crate::error::{GcScopeError, GcScopeResult};
use crate::runtime::{AppDomainData, ModuleData, Runtime};
use crate::source::MemorySource;
use crate::types::{Address, DomainId, ModuleId};

/// Loaded modules sorted by base address
///
/// Ranges never overlap, so an address belongs to at most one module and
/// [`ModuleIndex::find_module_containing`] is a binary search. Modules
/// discovered after the index was built are inserted in sorted position.
///
/// Records that cannot become a [`LoadedModule`] (no size, overlapping
/// range) are kept aside as [`Module::Error`] entries for diagnostics.
///
/// ## Domain mappings
///
/// Which domains loaded a module, and at what address, is only needed for
/// metadata import. Walking every domain's module list is more expensive
/// than building the index, so it happens on the first query that needs it
/// and then never again for this generation.
///
/// ## Thread Safety
///
/// The module list and the domain mappings sit behind reader-writer locks;
/// the index can be shared between threads.
pub struct ModuleIndex
{
    runtime: Arc<dyn Runtime>,
    source: Arc<dyn MemorySource>,
    modules: RwLock<Vec<Arc<Module>>>,
    failed: RwLock<Vec<Arc<Module>>>,
    domains: OnceCell<Vec<AppDomainData>>,
    next_error_id: AtomicU64,
}

impl ModuleIndex
{
    /// An index with no modules.
    pub fn empty(runtime: Arc<dyn Runtime>, source: Arc<dyn MemorySource>) -> Self
    {
        Self {
            runtime,
            source,
            modules: RwLock::new(Vec::new()),
            failed: RwLock::new(Vec::new()),
            domains: OnceCell::new(),
            next_error_id: AtomicU64::new(0),
        }
    }

    /// Build the index from the runtime's module list.
    ///
    /// Prefetches are only scheduled when `config.prefetch` is set and a
    /// `prefetcher` is supplied.
    ///
    /// ## Errors
    ///
    /// Propagates the runtime's failure to enumerate modules. Individual
    /// records that cannot be indexed do not fail the build.
    pub fn build(
        runtime: Arc<dyn Runtime>,
        source: Arc<dyn MemorySource>,
        config: &HeapConfig,
        prefetcher: Option<&Prefetcher>,
    ) -> GcScopeResult<Self>
    {
        let index = Self::empty(runtime, source);
        let prefetcher = prefetcher.filter(|_| config.prefetch);

        let mut records = index.runtime.modules()?;
        records.sort_by_key(|record| record.image_base);
        for record in records {
            if let Err(err) = index.add_module(record, prefetcher) {
                debug!("module not indexed: {err}");
            }
        }

        debug!(
            modules = index.len(),
            failed = index.failed_modules().len(),
            "built module index"
        );
        Ok(index)
    }

    /// Construct a module from `data` and insert it in sorted position.
    ///
    /// ## Errors
    ///
    /// `ModuleOverlap` if the range intersects an indexed module, or
    /// `InvalidArgument` if the module has no size. In both cases an error
    /// module is recorded in [`ModuleIndex::failed_modules`].
    pub fn add_module(&self, data: ModuleData, prefetcher: Option<&Prefetcher>) -> GcScopeResult<Arc<Module>>
    {
        let base = data.image_base;
        let name = data.file_name.clone();
        let module = LoadedModule::new(data, self.source.as_ref(), prefetcher);
        if module.size() == 0 {
            let err = GcScopeError::InvalidArgument(format!("module {name} at {base} has no size"));
            self.record_failure(base, &err);
            return Err(err);
        }

        let module = Arc::new(Module::Loaded(module));
        if let Err(err) = self.insert(module.clone()) {
            self.record_failure(base, &err);
            return Err(err);
        }
        Ok(module)
    }

    /// Insert an already constructed module, keeping the list sorted.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` for error modules; `ModuleOverlap` if the range
    /// intersects an indexed module.
    pub fn insert(&self, module: Arc<Module>) -> GcScopeResult<()>
    {
        if module.is_error() {
            return Err(GcScopeError::InvalidArgument("error modules have no address range".to_string()));
        }

        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        let position = modules.partition_point(|existing| existing.base() < module.base());
        let end = module.base().saturating_add(module.size());

        if let Some(previous) = position.checked_sub(1).and_then(|index| modules.get(index)) {
            if previous.base().saturating_add(previous.size()) > module.base() {
                return Err(GcScopeError::ModuleOverlap {
                    base: module.base(),
                    existing: previous.base(),
                });
            }
        }
        if let Some(next) = modules.get(position) {
            if next.base() < end {
                return Err(GcScopeError::ModuleOverlap {
                    base: module.base(),
                    existing: next.base(),
                });
            }
        }

        trace!(module = %module, position, "indexing module");
        modules.insert(position, module);
        Ok(())
    }

    /// The module whose `[base, base + size)` range contains `address`.
    ///
    /// `None` is a normal answer: the address may be heap memory, or belong
    /// to an image the index has not seen.
    pub fn find_module_containing(&self, address: Address) -> Option<Arc<Module>>
    {
        let modules = self.modules.read().unwrap_or_else(PoisonError::into_inner);
        modules
            .binary_search_by(|module| {
                if address < module.base() {
                    Ordering::Greater
                } else if address >= module.base().saturating_add(module.size()) {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .ok()
            .map(|position| modules[position].clone())
    }

    /// The module loaded exactly at `base`.
    pub fn find_by_base(&self, base: Address) -> Option<Arc<Module>>
    {
        let modules = self.modules.read().unwrap_or_else(PoisonError::into_inner);
        modules
            .binary_search_by_key(&base, |module| module.base())
            .ok()
            .map(|position| modules[position].clone())
    }

    /// First module whose file stem matches one of `config`'s core module names.
    pub fn find_core_module(&self, config: &HeapConfig) -> Option<Arc<Module>>
    {
        let modules = self.modules.read().unwrap_or_else(PoisonError::into_inner);
        modules
            .iter()
            .find(|module| config.is_core_module(module.name()))
            .cloned()
    }

    /// Correct the size of the module at `base`.
    ///
    /// ## Errors
    ///
    /// `ModuleNotFound` if no module starts at `base`; `ModuleOverlap` if the
    /// new size would run into the next module.
    pub fn correct_size(&self, base: Address, size: u64) -> GcScopeResult<()>
    {
        let modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        let position = modules
            .binary_search_by_key(&base, |module| module.base())
            .map_err(|_| GcScopeError::ModuleNotFound(base))?;
        let Some(loaded) = modules[position].as_loaded() else {
            return Err(GcScopeError::ModuleNotFound(base));
        };

        if let Some(next) = modules.get(position + 1) {
            if base.saturating_add(size) > next.base() {
                return Err(GcScopeError::ModuleOverlap {
                    base,
                    existing: next.base(),
                });
            }
        }

        debug!(base = %base, from = loaded.size(), to = size, "correcting module size");
        loaded.set_size(size);
        Ok(())
    }

    /// Indexed modules in address order.
    pub fn modules(&self) -> Vec<Arc<Module>>
    {
        self.modules.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Error modules for records that could not be indexed.
    pub fn failed_modules(&self) -> Vec<Arc<Module>>
    {
        self.failed.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize
    {
        self.modules.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// A fresh error module with the next synthetic id.
    pub fn error_module(&self, base: Address, reason: impl Into<String>) -> Arc<Module>
    {
        let sequence = self.next_error_id.fetch_add(1, AtomicOrdering::Relaxed);
        Arc::new(Module::Error(ErrorModule::new(ModuleId::synthetic(sequence), base, reason)))
    }

    fn record_failure(&self, base: Address, err: &GcScopeError)
    {
        warn!(base = %base, "discarding module record: {err}");
        let module = self.error_module(base, err.to_string());
        self.failed.write().unwrap_or_else(PoisonError::into_inner).push(module);
    }

    /// The first app-domain the runtime reports, if any.
    ///
    /// Does not walk domain module lists; an already recorded domain list is
    /// reused.
    ///
    /// ## Errors
    ///
    /// Propagates the runtime's failure to enumerate domains.
    pub fn primary_domain(&self) -> GcScopeResult<Option<DomainId>>
    {
        if let Some(domains) = self.domains.get() {
            return Ok(domains.first().map(|domain| domain.id));
        }
        Ok(self.runtime.app_domains()?.first().map(|domain| domain.id))
    }

    /// App-domains in the runtime's order; the first is the primary domain.
    ///
    /// The first call also records every domain's module mappings.
    ///
    /// ## Errors
    ///
    /// Propagates runtime failures while walking the domains.
    pub fn app_domains(&self) -> GcScopeResult<&[AppDomainData]>
    {
        self.domains
            .get_or_try_init(|| {
                let domains = self.runtime.app_domains()?;
                for domain in &domains {
                    for instance in self.runtime.domain_modules(domain.id)? {
                        match self.find_by_base(instance.image_base).as_deref() {
                            Some(Module::Loaded(module)) => module.add_domain_mapping(domain.id, instance.domain_module),
                            _ => trace!(
                                domain = %domain.id,
                                base = %instance.image_base,
                                "domain module for unindexed image"
                            ),
                        }
                    }
                }
                debug!(domains = domains.len(), "recorded domain module mappings");
                Ok(domains)
            })
            .map(Vec::as_slice)
    }

    /// Address at which `domain` loaded `module`'s module record.
    ///
    /// Returns the null address if the module is not mapped into that
    /// domain. With `domain == None` any mapped domain may answer; for an
    /// image loaded into several domains the choice is unspecified, so pass a
    /// domain whenever the answer has to be deterministic.
    ///
    /// ## Errors
    ///
    /// `StaleRevision` if `module` belongs to an older generation.
    pub fn domain_load_address(&self, module: &Module, domain: Option<DomainId>) -> GcScopeResult<Address>
    {
        let Module::Loaded(loaded) = module else {
            return Ok(Address::ZERO);
        };
        loaded.guard().check(self.source.current_revision())?;
        self.app_domains()?;
        Ok(loaded.domain_address(domain).unwrap_or(Address::ZERO))
    }

    /// Metadata importer for `module`, built on first use and cached.
    ///
    /// Returns `Ok(None)` for error modules and for modules not mapped into
    /// any domain.
    ///
    /// ## Errors
    ///
    /// `StaleRevision` if `module` belongs to an older generation.
    pub fn metadata_importer(&self, module: &Module) -> GcScopeResult<Option<Arc<dyn MetadataImport>>>
    {
        let Module::Loaded(loaded) = module else {
            return Ok(None);
        };
        loaded.guard().check(self.source.current_revision())?;

        if let Some(importer) = loaded.importer_cell().get() {
            return Ok(Some(importer.clone()));
        }

        let address = self.domain_load_address(module, None)?;
        if address.is_null() {
            debug!(module = module.name(), "module is not mapped into any domain");
            return Ok(None);
        }

        let Some(importer) = self.runtime.construct_metadata_importer(address) else {
            return Ok(None);
        };
        // A concurrent caller may have published first; both are equivalent.
        let _ = loaded.importer_cell().set(importer);
        Ok(loaded.importer_cell().get().cloned())
    }

    /// Debugging flags from the assembly's `DebuggableAttribute`.
    ///
    /// A missing importer, a missing attribute and a malformed blob all mean
    /// "no special debugging mode".
    ///
    /// ## Errors
    ///
    /// `StaleRevision` if `module` belongs to an older generation.
    pub fn debugging_modes(&self, module: &Module) -> GcScopeResult<DebuggingModes>
    {
        let Module::Loaded(loaded) = module else {
            return Ok(DebuggingModes::NONE);
        };
        loaded.guard().check(self.source.current_revision())?;
        if let Some(modes) = loaded.debugging_modes_cell().get() {
            return Ok(*modes);
        }

        let Some(importer) = self.metadata_importer(module)? else {
            return Ok(DebuggingModes::NONE);
        };
        let modes = match importer.assembly_attribute(DEBUGGABLE_ATTRIBUTE) {
            Some(blob) => parse_debuggable_attribute(&blob).unwrap_or_else(|| {
                debug!(module = module.name(), "malformed DebuggableAttribute blob");
                DebuggingModes::NONE
            }),
            None => DebuggingModes::NONE,
        };
        Ok(*loaded.debugging_modes_cell().get_or_init(|| modes))
    }
}
