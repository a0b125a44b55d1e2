//! Closed tool set exposed to the chat model.
//!
//! The model proposes calls by name with untrusted JSON arguments; this
//! module maps each payload onto a tagged variant or rejects it with a
//! structured error the orchestrator feeds back for a re-prompt. Nothing
//! is ever dispatched reflectively by name.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::llm::{RawToolCall, ToolSpec};

pub const SEARCH_CATALOG: &str = "buscar_info_producto";
pub const QUOTE_RENTAL: &str = "calcular_descuento";
pub const CHECK_AVAILABILITY: &str = "verificar_disponibilidad";
pub const DELIVERY_DATE: &str = "calcular_fecha_entrega";
pub const SAVE_CUSTOMER_NAME: &str = "guardar_nombre_cliente";
pub const RECORD_INTEREST: &str = "registrar_interes";

#[derive(Clone, Debug, PartialEq)]
pub enum ToolInvocation {
    SearchCatalog {
        query: String,
    },
    QuoteRental {
        base_rate: Decimal,
        duration_days: u32,
    },
    CheckAvailability {
        product: String,
    },
    DeliveryDate {
        lead_time_days: Option<u32>,
        business_days_only: Option<bool>,
        rental_days: Option<u32>,
    },
    SaveCustomerName {
        name: String,
    },
    RecordInterest {
        product: String,
        quoted_price: Option<Decimal>,
        quoted_days: Option<u32>,
    },
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ToolParseError {
    #[error("unknown tool `{0}`")]
    UnknownTool(String),
    #[error("invalid arguments for `{tool}`: {message}")]
    InvalidArguments { tool: String, message: String },
}

impl ToolParseError {
    /// Structured payload the model sees as the tool result, so it can
    /// correct the call instead of the turn failing.
    pub fn to_model_payload(&self) -> String {
        let kind = match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments { .. } => "invalid_arguments",
        };
        json!({ "error": kind, "detail": self.to_string() }).to_string()
    }
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    producto: String,
}

#[derive(Debug, Deserialize)]
struct QuoteArgs {
    precio: Decimal,
    dias: u32,
}

#[derive(Debug, Deserialize)]
struct AvailabilityArgs {
    equipo: String,
}

#[derive(Debug, Deserialize)]
struct DeliveryArgs {
    dias: Option<u32>,
    solo_dias_habiles: Option<bool>,
    dias_renta: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SaveNameArgs {
    nombre: String,
}

#[derive(Debug, Deserialize)]
struct InterestArgs {
    producto: String,
    precio: Option<Decimal>,
    dias: Option<u32>,
}

impl ToolInvocation {
    pub fn parse(call: &RawToolCall) -> Result<Self, ToolParseError> {
        match call.name.as_str() {
            SEARCH_CATALOG => {
                let args: SearchArgs = decode(SEARCH_CATALOG, &call.arguments)?;
                let query = non_empty(SEARCH_CATALOG, "producto", args.producto)?;
                Ok(Self::SearchCatalog { query })
            }
            QUOTE_RENTAL => {
                let args: QuoteArgs = decode(QUOTE_RENTAL, &call.arguments)?;
                Ok(Self::QuoteRental { base_rate: args.precio, duration_days: args.dias })
            }
            CHECK_AVAILABILITY => {
                let args: AvailabilityArgs = decode(CHECK_AVAILABILITY, &call.arguments)?;
                let product = non_empty(CHECK_AVAILABILITY, "equipo", args.equipo)?;
                Ok(Self::CheckAvailability { product })
            }
            DELIVERY_DATE => {
                let args: DeliveryArgs = decode(DELIVERY_DATE, &call.arguments)?;
                Ok(Self::DeliveryDate {
                    lead_time_days: args.dias,
                    business_days_only: args.solo_dias_habiles,
                    rental_days: args.dias_renta,
                })
            }
            SAVE_CUSTOMER_NAME => {
                let args: SaveNameArgs = decode(SAVE_CUSTOMER_NAME, &call.arguments)?;
                let name = non_empty(SAVE_CUSTOMER_NAME, "nombre", args.nombre)?;
                Ok(Self::SaveCustomerName { name })
            }
            RECORD_INTEREST => {
                let args: InterestArgs = decode(RECORD_INTEREST, &call.arguments)?;
                let product = non_empty(RECORD_INTEREST, "producto", args.producto)?;
                Ok(Self::RecordInterest {
                    product,
                    quoted_price: args.precio,
                    quoted_days: args.dias,
                })
            }
            other => Err(ToolParseError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SearchCatalog { .. } => SEARCH_CATALOG,
            Self::QuoteRental { .. } => QUOTE_RENTAL,
            Self::CheckAvailability { .. } => CHECK_AVAILABILITY,
            Self::DeliveryDate { .. } => DELIVERY_DATE,
            Self::SaveCustomerName { .. } => SAVE_CUSTOMER_NAME,
            Self::RecordInterest { .. } => RECORD_INTEREST,
        }
    }

    /// Ordering class within one planning round: read-only retrieval
    /// grounds the context first, pure calculators run next, and
    /// CRM-affecting tools go last so interest is only ever recorded
    /// after pricing/availability actually resolved.
    pub fn dispatch_rank(&self) -> u8 {
        match self {
            Self::SearchCatalog { .. } => 0,
            Self::QuoteRental { .. } | Self::CheckAvailability { .. } | Self::DeliveryDate { .. } => 1,
            Self::SaveCustomerName { .. } | Self::RecordInterest { .. } => 2,
        }
    }

    /// Declared schemas advertised to the chat model.
    pub fn specs() -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: SEARCH_CATALOG,
                description: "Busca información de productos en el catálogo de equipos",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "producto": { "type": "string", "description": "Nombre o descripción del equipo a buscar" }
                    },
                    "required": ["producto"],
                }),
            },
            ToolSpec {
                name: QUOTE_RENTAL,
                description: "Calcula el precio total de renta aplicando descuentos por duración",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "precio": { "type": "number", "description": "Tarifa diaria del equipo en lempiras" },
                        "dias": { "type": "integer", "minimum": 1, "description": "Días de renta" }
                    },
                    "required": ["precio", "dias"],
                }),
            },
            ToolSpec {
                name: CHECK_AVAILABILITY,
                description: "Verifica si un equipo está disponible en inventario",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "equipo": { "type": "string", "description": "Nombre del equipo" }
                    },
                    "required": ["equipo"],
                }),
            },
            ToolSpec {
                name: DELIVERY_DATE,
                description: "Calcula la fecha de entrega y, opcionalmente, la ventana de renta",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "dias": { "type": "integer", "minimum": 0, "description": "Días de anticipación para la entrega; si se omite aplica la anticipación estándar" },
                        "solo_dias_habiles": { "type": "boolean", "description": "Contar solo días hábiles (omite fines de semana y feriados)" },
                        "dias_renta": { "type": "integer", "minimum": 1, "description": "Duración de la renta para calcular la fecha de devolución" }
                    },
                    "required": [],
                }),
            },
            ToolSpec {
                name: SAVE_CUSTOMER_NAME,
                description: "Registra el nombre del cliente en el CRM",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "nombre": { "type": "string", "description": "Nombre del cliente" }
                    },
                    "required": ["nombre"],
                }),
            },
            ToolSpec {
                name: RECORD_INTEREST,
                description: "Registra el interés del cliente en un producto",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "producto": { "type": "string", "description": "Producto de interés" },
                        "precio": { "type": "number", "description": "Precio cotizado, si se calculó" },
                        "dias": { "type": "integer", "description": "Días cotizados, si se calcularon" }
                    },
                    "required": ["producto"],
                }),
            },
        ]
    }
}

fn decode<'a, T: Deserialize<'a>>(tool: &str, arguments: &'a Value) -> Result<T, ToolParseError> {
    T::deserialize(arguments).map_err(|error| ToolParseError::InvalidArguments {
        tool: tool.to_string(),
        message: error.to_string(),
    })
}

fn non_empty(tool: &str, field: &str, value: String) -> Result<String, ToolParseError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ToolParseError::InvalidArguments {
            tool: tool.to_string(),
            message: format!("`{field}` must not be empty"),
        });
    }
    Ok(trimmed.to_string())
}
