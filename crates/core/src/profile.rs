use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Cost/quality operating point for the assistant. Selected once at
/// startup; every knob the orchestrator needs hangs off the variant so
/// no string matching leaks into the turn loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    Economical,
    #[default]
    Balanced,
    Premium,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Economical => "economical",
            Self::Balanced => "balanced",
            Self::Premium => "premium",
        }
    }

    pub fn default_chat_model(&self) -> &'static str {
        match self {
            Self::Economical | Self::Balanced => "gpt-4o-mini",
            Self::Premium => "gpt-4o",
        }
    }

    pub fn temperature(&self) -> f32 {
        match self {
            Self::Economical => 0.3,
            Self::Balanced => 0.5,
            Self::Premium => 0.7,
        }
    }

    pub fn max_reply_tokens(&self) -> u32 {
        match self {
            Self::Economical => 200,
            Self::Balanced => 350,
            Self::Premium => 500,
        }
    }

    /// Register of the system prompt grows with the profile: the
    /// economical tier answers tersely, the premium tier sells.
    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::Economical => {
                "Eres el asistente de ventas de CONCESA, renta de equipos de construcción. \
                 Responde en español, breve y directo. Usa las herramientas disponibles para \
                 consultar el catálogo, cotizar precios, verificar disponibilidad y calcular \
                 fechas. Nunca inventes precios ni existencias."
            }
            Self::Balanced => {
                "Eres el asistente de ventas de CONCESA, empresa de renta de equipos de \
                 construcción. Atiende en español con tono amable y profesional. Usa las \
                 herramientas disponibles para buscar información del catálogo, calcular \
                 precios con descuento, verificar disponibilidad de equipos, calcular fechas \
                 de entrega y registrar los datos del cliente. Nunca inventes precios, \
                 existencias ni fechas: si una herramienta falla, discúlpate y ofrece \
                 alternativas."
            }
            Self::Premium => {
                "Eres el asesor comercial de CONCESA, líder en renta de equipos de \
                 construcción. Atiende en español con calidez y detalle: saluda por nombre \
                 cuando lo conozcas, explica los descuentos por duración y sugiere equipos \
                 complementarios cuando tenga sentido. Apóyate siempre en las herramientas \
                 para datos de catálogo, precios, disponibilidad y fechas de entrega, y \
                 registra el interés del cliente. Nunca inventes datos que las herramientas \
                 no hayan confirmado."
            }
        }
    }
}

impl std::str::FromStr for Profile {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "economical" => Ok(Self::Economical),
            "balanced" => Ok(Self::Balanced),
            "premium" => Ok(Self::Premium),
            other => Err(ConfigError::Validation(format!(
                "unsupported profile `{other}` (expected economical|balanced|premium)"
            ))),
        }
    }
}
