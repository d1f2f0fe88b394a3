// HL7v2 to FHIR Processor

use super::{check_arguments, render_root, CancellationToken, DataType, Processor};
use crate::errors::Result;
use crate::hl7v2::EncodingCharacters;
use crate::model::{ObjectMap, Value};
use crate::parsers::Hl7v2DataParser;
use crate::post_process;
use crate::provider::TemplateProvider;
use crate::settings::ProcessorSettings;
use crate::trace::{unused_segments, TraceInfo};
use std::collections::HashMap;
use std::sync::Arc;

/// Variable holding the message's separator characters
pub const ENCODING_CHARACTERS_KEY: &str = "encodingCharacters";

#[derive(Debug, Default, Clone)]
pub struct Hl7v2Processor {
    settings: ProcessorSettings,
}

impl Hl7v2Processor {
    pub fn new(settings: ProcessorSettings) -> Self {
        Self { settings }
    }
}

fn encoding_value(encoding: &EncodingCharacters) -> Value {
    let mut map = ObjectMap::new();
    for (key, c) in [
        ("field", encoding.field),
        ("component", encoding.component),
        ("repetition", encoding.repetition),
        ("escape", encoding.escape),
        ("subComponent", encoding.sub_component),
    ] {
        map.insert(key.to_string(), Value::String(c.to_string()));
    }
    Value::object(map)
}

impl Processor for Hl7v2Processor {
    fn data_type(&self) -> DataType {
        DataType::Hl7v2
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
        let provider = check_arguments(root_template, provider, cancellation)?;
        log::debug!("Converting HL7v2 message with root template '{}'", root_template);

        let message = Arc::new(Hl7v2DataParser::new().parse_message(data)?);
        let globals = HashMap::from([(
            ENCODING_CHARACTERS_KEY.to_string(),
            encoding_value(&message.encoding_characters),
        )]);

        let rendered = render_root(
            &self.settings,
            DataType::Hl7v2,
            provider,
            root_template,
            Value::Hl7Data(Arc::clone(&message)),
            globals,
        )?;
        let output = post_process::process(&rendered.text)?;

        match trace {
            Some(trace) => *trace = TraceInfo::from_hl7v2(&message, rendered.validated_schemas),
            None if self.settings.enable_trace => {
                log::debug!(
                    "{} segments carry unused components",
                    unused_segments(&message).len()
                );
            }
            None => {}
        }
        Ok(output)
    }
}
