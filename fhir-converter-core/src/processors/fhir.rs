// FHIR to FHIR Processor
//
// Re-shapes FHIR resources, e.g. between FHIR versions. The input resource is
// bound as `msg`, exactly as for generic JSON.

use super::{convert_tree, CancellationToken, DataType, Processor};
use crate::errors::Result;
use crate::parsers::JsonDataParser;
use crate::provider::TemplateProvider;
use crate::settings::ProcessorSettings;
use crate::trace::TraceInfo;

#[derive(Debug, Default, Clone)]
pub struct FhirProcessor {
    settings: ProcessorSettings,
}

impl FhirProcessor {
    pub fn new(settings: ProcessorSettings) -> Self {
        Self { settings }
    }
}

impl Processor for FhirProcessor {
    fn data_type(&self) -> DataType {
        DataType::Fhir
    }

    fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    fn convert_with_cancellation(
        &self,
        data: &str,
        root_template: &str,
        provider: Option<&dyn TemplateProvider>,
        cancellation: &CancellationToken,
        trace: Option<&mut TraceInfo>,
    ) -> Result<String> {
        convert_tree(
            &self.settings,
            DataType::Fhir,
            &JsonDataParser::new(),
            data,
            root_template,
            provider,
            cancellation,
            trace,
        )
    }
}
