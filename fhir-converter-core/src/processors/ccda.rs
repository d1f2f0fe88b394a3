// C-CDA to FHIR Processor

use super::{convert_tree, CancellationToken, DataType, Processor};
use crate::errors::Result;
use crate::parsers::CcdaDataParser;
use crate::provider::TemplateProvider;
use crate::settings::ProcessorSettings;
use crate::trace::TraceInfo;

/// Converts C-CDA documents; the folded XML tree is bound as `msg`
#[derive(Debug, Default, Clone)]
pub struct CcdaProcessor {
    settings: ProcessorSettings,
}

impl CcdaProcessor {
    pub fn new(settings: ProcessorSettings) -> Self {
        Self { settings }
    }
}

impl Processor for CcdaProcessor {
    fn data_type(&self) -> DataType {
        DataType::Ccda
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
            DataType::Ccda,
            &CcdaDataParser::new(),
            data,
            root_template,
            provider,
            cancellation,
            trace,
        )
    }
}
