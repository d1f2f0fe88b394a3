// JSON to FHIR Processor

use super::{convert_tree, CancellationToken, DataType, Processor};
use crate::errors::Result;
use crate::parsers::JsonDataParser;
use crate::provider::TemplateProvider;
use crate::settings::ProcessorSettings;
use crate::trace::TraceInfo;

#[derive(Debug, Default, Clone)]
pub struct JsonProcessor {
    settings: ProcessorSettings,
}

impl JsonProcessor {
    pub fn new(settings: ProcessorSettings) -> Self {
        Self { settings }
    }
}

impl Processor for JsonProcessor {
    fn data_type(&self) -> DataType {
        DataType::Json
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
            DataType::Json,
            &JsonDataParser::new(),
            data,
            root_template,
            provider,
            cancellation,
            trace,
        )
    }
}
