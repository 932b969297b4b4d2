//! Capability registry binding a deployment's store to the handlers.

use std::fmt;
use std::sync::Arc;

use crate::stores::{
    Concatenator, ContentReader, DataStore, Extension, Finisher, LengthDeferrer, Terminator,
};

/// Registry of the capabilities a concrete store provides.
///
/// The mandatory [`DataStore`] operations are always present; each optional
/// capability is registered explicitly at assembly time and enables the
/// matching protocol feature. Handlers query the `supports_*` booleans to
/// advertise extensions at OPTIONS time and to refuse requests the
/// deployment cannot serve.
#[derive(Clone)]
pub struct StoreComposer {
    core: Arc<dyn DataStore>,
    reader: Option<Arc<dyn ContentReader>>,
    terminator: Option<Arc<dyn Terminator>>,
    concatenator: Option<Arc<dyn Concatenator>>,
    length_deferrer: Option<Arc<dyn LengthDeferrer>>,
    finisher: Option<Arc<dyn Finisher>>,
}

impl StoreComposer {
    pub fn new(core: Arc<dyn DataStore>) -> StoreComposer {
        StoreComposer {
            core,
            reader: None,
            terminator: None,
            concatenator: None,
            length_deferrer: None,
            finisher: None,
        }
    }

    pub fn use_reader(mut self, reader: Arc<dyn ContentReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn use_terminator(mut self, terminator: Arc<dyn Terminator>) -> Self {
        self.terminator = Some(terminator);
        self
    }

    pub fn use_concatenator(mut self, concatenator: Arc<dyn Concatenator>) -> Self {
        self.concatenator = Some(concatenator);
        self
    }

    pub fn use_length_deferrer(mut self, length_deferrer: Arc<dyn LengthDeferrer>) -> Self {
        self.length_deferrer = Some(length_deferrer);
        self
    }

    pub fn use_finisher(mut self, finisher: Arc<dyn Finisher>) -> Self {
        self.finisher = Some(finisher);
        self
    }

    pub fn core(&self) -> &Arc<dyn DataStore> {
        &self.core
    }

    pub fn reader(&self) -> Option<&Arc<dyn ContentReader>> {
        self.reader.as_ref()
    }

    pub fn terminator(&self) -> Option<&Arc<dyn Terminator>> {
        self.terminator.as_ref()
    }

    pub fn concatenator(&self) -> Option<&Arc<dyn Concatenator>> {
        self.concatenator.as_ref()
    }

    pub fn length_deferrer(&self) -> Option<&Arc<dyn LengthDeferrer>> {
        self.length_deferrer.as_ref()
    }

    pub fn finisher(&self) -> Option<&Arc<dyn Finisher>> {
        self.finisher.as_ref()
    }

    pub fn supports_reader(&self) -> bool {
        self.reader.is_some()
    }

    pub fn supports_termination(&self) -> bool {
        self.terminator.is_some()
    }

    pub fn supports_concatenation(&self) -> bool {
        self.concatenator.is_some()
    }

    pub fn supports_length_deferral(&self) -> bool {
        self.length_deferrer.is_some()
    }

    pub fn supports_finishing(&self) -> bool {
        self.finisher.is_some()
    }

    /// The extensions this deployment advertises, in a stable order.
    pub fn extensions(&self) -> Vec<Extension> {
        let mut extensions = vec![Extension::Creation, Extension::CreationWithUpload];
        if self.supports_length_deferral() {
            extensions.push(Extension::CreationDeferLength);
        }
        if self.supports_termination() {
            extensions.push(Extension::Termination);
        }
        if self.supports_concatenation() {
            extensions.push(Extension::Concatenation);
        }
        extensions
    }
}

impl fmt::Debug for StoreComposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreComposer")
            .field("reader", &self.supports_reader())
            .field("terminator", &self.supports_termination())
            .field("concatenator", &self.supports_concatenation())
            .field("length_deferrer", &self.supports_length_deferral())
            .field("finisher", &self.supports_finishing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use salvo_core::async_trait;

    use super::*;
    use crate::error::{StoreError, StoreResult};
    use crate::stores::{ByteStream, UploadInfo};

    struct BareStore;

    #[async_trait]
    impl DataStore for BareStore {
        async fn create(&self, info: UploadInfo) -> StoreResult<UploadInfo> {
            Ok(info)
        }

        async fn append(&self, _id: &str, _offset: u64, _stream: ByteStream) -> StoreResult<u64> {
            Err(StoreError::NotFound)
        }

        async fn info(&self, _id: &str) -> StoreResult<UploadInfo> {
            Err(StoreError::NotFound)
        }
    }

    #[async_trait]
    impl Terminator for BareStore {
        async fn terminate(&self, _id: &str) -> StoreResult<()> {
            Ok(())
        }
    }

    #[test]
    fn bare_composer_advertises_creation_only() {
        let composer = StoreComposer::new(Arc::new(BareStore));
        assert!(!composer.supports_reader());
        assert!(!composer.supports_termination());
        assert!(!composer.supports_concatenation());
        assert!(!composer.supports_length_deferral());
        assert_eq!(
            composer.extensions(),
            vec![Extension::Creation, Extension::CreationWithUpload]
        );
    }

    #[test]
    fn registered_capabilities_show_up_in_extensions() {
        let store = Arc::new(BareStore);
        let composer = StoreComposer::new(store.clone()).use_terminator(store);
        assert!(composer.supports_termination());
        assert_eq!(
            Extension::to_header_value(&composer.extensions()),
            "creation,creation-with-upload,termination"
        );
    }

    #[cfg(feature = "disk-store")]
    #[test]
    fn disk_store_composes_every_capability() {
        let composer = crate::stores::DiskStore::new().compose();
        assert!(composer.supports_reader());
        assert!(composer.supports_termination());
        assert!(composer.supports_concatenation());
        assert!(composer.supports_length_deferral());
        assert!(composer.supports_finishing());
        assert_eq!(
            Extension::to_header_value(&composer.extensions()),
            "creation,creation-with-upload,creation-defer-length,termination,concatenation"
        );
    }
}
