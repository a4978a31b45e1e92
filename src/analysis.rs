//! Report client for the generative completion service.
//!
//! One image, one mode, one attempt. The request carries the inline image,
//! a mode-specific instruction profile and a fixed four-field response
//! schema; the answer is a JSON dossier parsed into a [`Report`].
//!
//! Failure policy is part of the interface, not an accident: teaser-mode
//! callers go through [`resolve_teaser`], which converts *every* failure
//! into the fixed [`fallback_report`] so the funnel never blocks. Real-mode
//! callers keep the error and surface it.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::{AppError, ErrorKind, ImageData, Report};

/// Completion model the funnel is pinned to.
pub const COMPLETION_MODEL: &str = "gemini-2.5-flash";

const SYSTEM_PROMPT_TEASER: &str = r#"
ATUE COMO: Um Especialista em Fisiognomonia, Micro-expressões Faciais e Psicologia Comportamental Forense.

TAREFA: Analise a imagem anexada. Gere um "Dossiê de Personalidade TrueSight" agressivo, direto e baseado em probabilidades.

ESTRUTURA DE ANÁLISE OBRIGATÓRIA (Para compor os campos do JSON):

1. ÍNDICE DE RISCO (0 a 100%):
   - Estime um risco de Narcisismo, Infidelidade e Agressividade. (Seja polêmico, mas use termos como "Alta probabilidade baseada em traços").

2. ANÁLISE DOS OLHOS:
   - O que o formato e o olhar dizem sobre as intenções ocultas?

3. MICRO-EXPRESSÕES E SORRISO:
   - Analise se há congruência ou sinais de dissimulação.

4. TRAÇOS DE PERSONALIDADE:
   - Pontos Fortes (ex: Carisma, Liderança).
   - Pontos Sombrios (ex: Manipulação, Falta de Empatia).

5. VEREDITO FINAL DA IA:
   - Um resumo de 3 linhas sobre: "Devo confiar nessa pessoa?"

Tom de voz: Científico, frio, analítico e "Black Mirror".

IMPORTANTE:
- Adicione o seguinte disclaimer no final da análise: "Nota: Análise baseada em padrões visuais e probabilidades estatísticas, não constitui diagnóstico clínico."
- Você DEVE estruturar a resposta EXATAMENTE no formato JSON solicitado abaixo.
"#;

const SYSTEM_PROMPT_REAL: &str = "Analise esta face e procure traços de agressividade, narcisismo e infidelidade. Seja técnico e direto. Responda em tópicos.";

const USER_PROMPT_TEASER: &str = "Gere o Dossiê de Personalidade TrueSight para esta face seguindo rigorosamente as instruções de sistema.";

const USER_PROMPT_REAL: &str = "Analise esta face e procure traços de agressividade, narcisismo e infidelidade. Seja técnico e direto. Responda em tópicos. Formate a saída como JSON compatível com a estrutura solicitada.";

/// Which instruction profile and failure policy a generation call runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisMode {
    /// Funnel scan: failures are masked behind the fallback dossier.
    Teaser,
    /// Paid dashboard analysis: failures surface and consume no credit.
    Real,
}

impl AnalysisMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Teaser => "teaser",
            Self::Real => "real",
        }
    }

    /// Teaser mode never lets a failure escape to the caller.
    #[must_use]
    pub const fn fails_open(self) -> bool {
        matches!(self, Self::Teaser)
    }

    #[must_use]
    const fn system_instruction(self) -> &'static str {
        match self {
            Self::Teaser => SYSTEM_PROMPT_TEASER,
            Self::Real => SYSTEM_PROMPT_REAL,
        }
    }

    #[must_use]
    const fn user_prompt(self) -> &'static str {
        match self {
            Self::Teaser => USER_PROMPT_TEASER,
            Self::Real => USER_PROMPT_REAL,
        }
    }
}

#[must_use]
pub fn completion_url(base: &str) -> String {
    format!(
        "{}/models/{COMPLETION_MODEL}:generateContent",
        base.trim_end_matches('/')
    )
}

/// Builds the generateContent body for one image and mode.
#[must_use]
pub fn completion_request(image: &ImageData, mode: AnalysisMode) -> Value {
    json!({
        "contents": {
            "parts": [
                {
                    "inlineData": {
                        "mimeType": image.mime_type(),
                        "data": BASE64.encode(image.data()),
                    }
                },
                { "text": mode.user_prompt() },
            ]
        },
        "systemInstruction": {
            "parts": [ { "text": mode.system_instruction() } ]
        },
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": response_schema(),
        },
    })
}

fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "titulo_principal": { "type": "STRING" },
            "pontuacao_confiabilidade": { "type": "NUMBER" },
            "red_flags": { "type": "ARRAY", "items": { "type": "STRING" } },
            "analise_detalhada": { "type": "STRING" },
        },
        "required": [
            "titulo_principal",
            "pontuacao_confiabilidade",
            "red_flags",
            "analise_detalhada",
        ],
    })
}

// Lenient mirror of the completion answer; anything missing defaults to
// empty and fails later with a precise AnalysisError.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Content,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("completion response contained no candidates")]
    NoCandidates,
    #[error("completion candidate contained no text part")]
    NoText,
    #[error("dossier payload was not valid JSON: {0}")]
    MalformedDossier(String),
}

impl From<AnalysisError> for AppError {
    fn from(e: AnalysisError) -> Self {
        AppError::new(ErrorKind::AnalysisFailed, "report generation failed")
            .with_internal(e.to_string())
    }
}

/// The dossier as the completion service emits it.
#[derive(Debug, Deserialize)]
struct DossierPayload {
    titulo_principal: String,
    pontuacao_confiabilidade: f64,
    red_flags: Vec<String>,
    analise_detalhada: String,
}

impl From<DossierPayload> for Report {
    fn from(d: DossierPayload) -> Self {
        Report {
            title: d.titulo_principal,
            score: d.pontuacao_confiabilidade,
            red_flags: d.red_flags,
            details: d.analise_detalhada,
        }
    }
}

/// Extracts the dossier from a completion answer.
pub fn report_from_response(response: &CompletionResponse) -> Result<Report, AnalysisError> {
    let candidate = response.candidates.first().ok_or(AnalysisError::NoCandidates)?;
    let text = candidate
        .content
        .parts
        .iter()
        .find_map(|p| p.text.as_deref())
        .ok_or(AnalysisError::NoText)?;
    parse_dossier(text)
}

pub fn parse_dossier(text: &str) -> Result<Report, AnalysisError> {
    serde_json::from_str::<DossierPayload>(text)
        .map(Report::from)
        .map_err(|e| AnalysisError::MalformedDossier(e.to_string()))
}

/// The fail-open contract for teaser mode: whatever went wrong, the caller
/// receives a well-formed dossier whose content signals the error.
#[must_use]
pub fn resolve_teaser(outcome: Result<Report, AppError>) -> Report {
    match outcome {
        Ok(report) => report,
        Err(err) => {
            tracing::warn!(error = %err, "teaser generation failed, serving fallback dossier");
            fallback_report()
        }
    }
}

/// Fixed dossier served when teaser generation fails for any reason.
#[must_use]
pub fn fallback_report() -> Report {
    Report {
        title: "ERRO DE LEITURA / DISSIMULAÇÃO EXTREMA".into(),
        score: 12.0,
        red_flags: vec![
            "Falha na API ou Bloqueio de Segurança".into(),
            "Padrão facial inconclusivo".into(),
            "Possível uso de tecnologia anti-vigilância".into(),
        ],
        details: "O sistema não conseguiu processar os dados biométricos com precisão. \
                  Isso geralmente ocorre quando o sujeito utiliza técnicas de ofuscação \
                  ou quando a chave de API do sistema está inativa. Tente novamente."
            .into(),
    }
}
