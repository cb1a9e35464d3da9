use crate::error::{RegistrarError, RegistrarResult};
use revreg_core::{AnchoredObject, IssuerId, RegistrationResult, Registrar, RevRegResult};
use std::sync::Arc;

/// Registrars tried by predicate. Exactly one must support an issuer.
#[derive(Default, Clone)]
pub struct RegistrarSet {
    registrars: Vec<Arc<dyn Registrar>>,
}

impl RegistrarSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, registrar: Arc<dyn Registrar>) -> Self {
        self.registrars.push(registrar);
        self
    }

    pub fn register_handler(&mut self, registrar: Arc<dyn Registrar>) {
        self.registrars.push(registrar);
    }

    pub fn len(&self) -> usize {
        self.registrars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrars.is_empty()
    }

    /// The single registrar supporting `issuer_id`.
    pub fn resolve(&self, issuer_id: &IssuerId) -> RegistrarResult<&Arc<dyn Registrar>> {
        let matches: Vec<&Arc<dyn Registrar>> = self
            .registrars
            .iter()
            .filter(|r| r.supports(issuer_id))
            .collect();

        match matches.as_slice() {
            [] => Err(RegistrarError::NoRegistrar(issuer_id.to_string())),
            [one] => Ok(*one),
            many => Err(RegistrarError::AmbiguousRegistrar {
                issuer: issuer_id.to_string(),
                names: many.iter().map(|r| r.name().to_string()).collect(),
            }),
        }
    }
}

impl Registrar for RegistrarSet {
    fn name(&self) -> &str {
        "registrar-set"
    }

    fn supports(&self, issuer_id: &IssuerId) -> bool {
        self.resolve(issuer_id).is_ok()
    }

    fn register(&self, object: AnchoredObject<'_>) -> RevRegResult<RegistrationResult> {
        let registrar = self.resolve(object.issuer_id())?;
        registrar.register(object)
    }
}
