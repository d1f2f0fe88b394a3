// General Filters
//
// Code-mapping lookups and deterministic identifier generation.

use super::{arg, arg_string, FilterContext, FilterRegistry};
use crate::errors::{FhirConverterError, FhirConverterErrorCode, Result};
use crate::model::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Mapping value meaning "emit the source code unchanged"
pub const PASSTHROUGH: &str = "__passthrough__";

pub fn register(registry: &mut FilterRegistry) {
    registry.register("get_property", get_property);
    registry.register("generate_uuid", generate_uuid);
    registry.register("generate_id_input", generate_id_input);
}

/// Name-based UUID built from the first 16 bytes of the SHA-256 digest of
/// `input`, stamped with the RFC 9562 version 8 and variant bits
pub fn uuid_for(input: &str) -> Uuid {
    let digest = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::new_v8(bytes)
}

/// `{{ code | get_property: 'CodeSystem/Gender', 'display' }}`
fn get_property(ctx: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let code = input.to_output_string();
    if code.trim().is_empty() {
        return Ok(Value::Nil);
    }
    let mapping = arg_string(args, 0, "");
    let property = arg_string(args, 1, "code");

    let Some(table) = ctx.code_mapping else {
        return Ok(Value::Nil);
    };
    Ok(match table.lookup(&mapping, &code, &property) {
        Some(PASSTHROUGH) => Value::String(code),
        Some(value) => Value::String(value.to_string()),
        None => Value::Nil,
    })
}

fn generate_uuid(_: &FilterContext, input: &Value, _: &[Value]) -> Result<Value> {
    if input.is_blank() {
        return Ok(Value::Nil);
    }
    Ok(Value::String(uuid_for(&input.to_output_string()).to_string()))
}

/// Builds the seed string for `generate_uuid`: `resourceType_segment[_baseId]`
fn generate_id_input(_: &FilterContext, input: &Value, args: &[Value]) -> Result<Value> {
    let segment = input.to_output_string();
    if segment.trim().is_empty() {
        return Ok(Value::Nil);
    }

    let resource_type = arg_string(args, 0, "");
    if resource_type.trim().is_empty() {
        return Err(FhirConverterError::render(
            FhirConverterErrorCode::InvalidIdGenerationInput,
            "generate_id_input: resource type is required",
        ));
    }

    let base_id_required = arg(args, 1).is_truthy();
    let base_id = arg_string(args, 2, "");
    if base_id_required && base_id.trim().is_empty() {
        return Err(FhirConverterError::render(
            FhirConverterErrorCode::InvalidIdGenerationInput,
            format!("generate_id_input: base id is required for {}", resource_type),
        ));
    }

    let mut seed = format!("{}_{}", resource_type.trim(), segment.trim());
    if !base_id.trim().is_empty() {
        seed.push('_');
        seed.push_str(base_id.trim());
    }
    Ok(Value::String(seed))
}
