//! # Support Tickets and Assistant
//!
//! Ticket types, the system messages a ticket update produces, and the
//! keyword-based assistant.
//!
//! ## Assistant Pipeline
//! ```text
//!   message ──► search_term ──► (db) knowledge base ≤3, FAQ ≤2
//!                                           │
//!      detect_intent ──► canned response ◄──┘ suggestions appended
//!                              │
//!                              ▼
//!   confidence = 0.5 + 0.2·kb + 0.2·faq + 0.1·(len > 100), capped at 1.0
//!   should_escalate = confidence < 0.7
//! ```
//!
//! There is no model inference. `KnowledgeBaseArticle::embedding_vector`
//! is stored but never read.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::validation::{validate_rating, validate_required};

// =============================================================================
// Enums
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TicketStatus::Open => "Abierto",
            TicketStatus::InProgress => "En Progreso",
            TicketStatus::Resolved => "Resuelto",
            TicketStatus::Closed => "Cerrado",
        }
    }

    pub fn is_resolution(&self) -> bool {
        matches!(self, TicketStatus::Resolved | TicketStatus::Closed)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "open" => Ok(TicketStatus::Open),
            "in_progress" => Ok(TicketStatus::InProgress),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            _ => Err(ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: vec![
                    "open".into(),
                    "in_progress".into(),
                    "resolved".into(),
                    "closed".into(),
                ],
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Ai,
    Human,
    System,
    StatusChange,
    AssignmentChange,
    Notification,
    Closure,
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SupportCategory {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SupportTicket {
    pub id: String,
    /// `TK-` plus 8 uppercase alphanumerics.
    pub ticket_number: String,
    pub user_id: String,
    pub category_id: Option<String>,
    pub subject: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub ai_response: Option<String>,
    pub ai_confidence: f64,
    pub is_resolved: bool,
    pub rating: Option<i64>,
    pub feedback: Option<String>,
    pub assigned_to: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SupportMessage {
    pub id: String,
    pub ticket_id: String,
    pub sender_id: Option<String>,
    pub message_type: MessageType,
    pub content: String,
    pub previous_status: Option<TicketStatus>,
    pub new_status: Option<TicketStatus>,
    /// Staff-only.
    pub is_internal: bool,
    pub ai_tokens_used: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct KnowledgeBaseArticle {
    pub id: String,
    pub category_id: Option<String>,
    pub title: String,
    pub content: String,
    /// Comma separated.
    pub keywords: String,
    pub embedding_vector: Option<String>,
    pub times_used: i64,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl KnowledgeBaseArticle {
    pub fn keyword_list(&self) -> impl Iterator<Item = String> + '_ {
        self.keywords
            .split(',')
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
    }

    /// Whether the keyword list contains `term`.
    pub fn matches(&self, term: &str) -> bool {
        !term.is_empty() && self.keywords.to_lowercase().contains(term)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Faq {
    pub id: String,
    pub category_id: Option<String>,
    pub question: String,
    pub answer: String,
    pub helpful_votes: i64,
    pub not_helpful_votes: i64,
    pub is_active: bool,
    pub sort_order: i64,
}

impl Faq {
    /// Percentage of helpful votes, 0 with no votes.
    pub fn helpfulness_ratio(&self) -> f64 {
        let total = self.helpful_votes + self.not_helpful_votes;
        if total == 0 {
            return 0.0;
        }
        self.helpful_votes as f64 / total as f64 * 100.0
    }

    /// Whether the question contains `term`.
    pub fn matches(&self, term: &str) -> bool {
        !term.is_empty() && self.question.to_lowercase().contains(term)
    }
}

// =============================================================================
// Assistant Conversations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
}

/// Quick-chat history of an authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct AIConversation {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    /// JSON array of [`ChatTurn`].
    pub messages: String,
    pub total_messages: i64,
    pub total_tokens: i64,
    pub escalated_to_human: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl AIConversation {
    pub fn turns(&self) -> CoreResult<Vec<ChatTurn>> {
        if self.messages.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&self.messages).map_err(|e| {
            CoreError::from(ValidationError::InvalidFormat {
                field: "messages".to_string(),
                reason: e.to_string(),
            })
        })
    }

    /// Appends one user/assistant exchange.
    pub fn record_exchange(
        &mut self,
        question: &str,
        reply: &AssistantReply,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let mut turns = self.turns()?;
        turns.push(ChatTurn {
            role: ChatRole::User,
            content: question.to_string(),
            timestamp: now,
        });
        turns.push(ChatTurn {
            role: ChatRole::Assistant,
            content: reply.response.clone(),
            timestamp: now,
        });
        self.messages = serde_json::to_string(&turns).map_err(|e| {
            CoreError::from(ValidationError::InvalidFormat {
                field: "messages".to_string(),
                reason: e.to_string(),
            })
        })?;
        self.total_messages = turns.len() as i64;
        self.total_tokens += reply.tokens_used;
        self.escalated_to_human |= reply.should_escalate;
        self.updated_at = now;
        Ok(())
    }
}

// =============================================================================
// Ticket Numbers
// =============================================================================

pub const TICKET_PREFIX: &str = "TK-";

/// New random ticket number.
pub fn generate_ticket_number() -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{}{}", TICKET_PREFIX, &hex[..8])
}

pub fn is_ticket_number(value: &str) -> bool {
    value
        .strip_prefix(TICKET_PREFIX)
        .map(|rest| {
            rest.len() == 8
                && rest
                    .chars()
                    .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        })
        .unwrap_or(false)
}

// =============================================================================
// Ticket Workflow
// =============================================================================

/// Fields a customer fills in to open a ticket.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewTicket {
    pub category_id: Option<String>,
    pub subject: String,
    pub description: String,
    pub priority: Option<TicketPriority>,
}

impl NewTicket {
    pub fn validate(&self) -> CoreResult<()> {
        validate_required("subject", &self.subject, 200)?;
        validate_required("description", &self.description, 5000)?;
        Ok(())
    }
}

/// Staff update to a ticket. `None` leaves a field alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TicketUpdate {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    /// `Some(None)` unassigns.
    pub assigned_to: Option<Option<String>>,
    pub internal_note: Option<String>,
}

/// A system message an update produces.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemNote {
    pub message_type: MessageType,
    pub content: String,
    pub previous_status: Option<TicketStatus>,
    pub new_status: Option<TicketStatus>,
    pub is_internal: bool,
}

/// Result of applying a [`TicketUpdate`].
#[derive(Debug, Clone, Default)]
pub struct TicketChanges {
    pub notes: Vec<SystemNote>,
    pub status_changed: Option<(TicketStatus, TicketStatus)>,
}

impl SupportTicket {
    /// Marks the ticket resolved.
    pub fn mark_resolved(&mut self, now: DateTime<Utc>) {
        self.status = TicketStatus::Resolved;
        self.is_resolved = true;
        self.resolved_at = Some(now);
        self.updated_at = now;
    }

    fn set_status(&mut self, status: TicketStatus, now: DateTime<Utc>) {
        if status.is_resolution() {
            self.is_resolved = true;
            self.resolved_at.get_or_insert(now);
        } else {
            self.is_resolved = false;
            self.resolved_at = None;
        }
        self.status = status;
        self.updated_at = now;
    }

    /// A staff reply picks up an open ticket.
    ///
    /// `requested` overrides the automatic `open → in_progress` move.
    pub fn apply_staff_reply(
        &mut self,
        requested: Option<TicketStatus>,
        now: DateTime<Utc>,
    ) -> TicketChanges {
        let target = requested.or_else(|| {
            (self.status == TicketStatus::Open).then_some(TicketStatus::InProgress)
        });
        let mut changes = TicketChanges::default();
        if let Some(target) = target {
            self.record_status(target, None, now, &mut changes);
        }
        self.updated_at = now;
        changes
    }

    /// Applies a staff update, returning the system messages to store.
    pub fn apply_update(&mut self, update: &TicketUpdate, now: DateTime<Utc>) -> TicketChanges {
        let mut changes = TicketChanges::default();

        if let Some(status) = update.status {
            self.record_status(status, update.internal_note.as_deref(), now, &mut changes);
        } else if let Some(note) = update.internal_note.as_deref().filter(|n| !n.trim().is_empty()) {
            changes.notes.push(SystemNote {
                message_type: MessageType::System,
                content: note.trim().to_string(),
                previous_status: None,
                new_status: None,
                is_internal: true,
            });
        }

        if let Some(priority) = update.priority {
            self.priority = priority;
        }

        if let Some(assigned) = &update.assigned_to {
            if *assigned != self.assigned_to {
                let name = |who: &Option<String>| {
                    who.clone().unwrap_or_else(|| "Sin asignar".to_string())
                };
                changes.notes.push(SystemNote {
                    message_type: MessageType::AssignmentChange,
                    content: format!(
                        "Ticket reasignado de '{}' a '{}'",
                        name(&self.assigned_to),
                        name(assigned)
                    ),
                    previous_status: None,
                    new_status: None,
                    is_internal: false,
                });
                self.assigned_to = assigned.clone();
            }
        }

        self.updated_at = now;
        changes
    }

    fn record_status(
        &mut self,
        status: TicketStatus,
        extra: Option<&str>,
        now: DateTime<Utc>,
        changes: &mut TicketChanges,
    ) {
        let previous = self.status;
        if previous == status {
            return;
        }
        let mut content = format!(
            "Estado del ticket cambiado de '{}' a '{}'",
            previous.label(),
            status.label()
        );
        if let Some(extra) = extra.map(str::trim).filter(|e| !e.is_empty()) {
            content.push_str("\n\n");
            content.push_str(extra);
        }
        changes.notes.push(SystemNote {
            message_type: MessageType::StatusChange,
            content,
            previous_status: Some(previous),
            new_status: Some(status),
            is_internal: false,
        });
        if status == TicketStatus::Resolved {
            changes.notes.push(SystemNote {
                message_type: MessageType::Closure,
                content: format!(
                    "Tu ticket #{} ha sido marcado como resuelto. Si el problema persiste, responde a este ticket.",
                    self.ticket_number
                ),
                previous_status: None,
                new_status: None,
                is_internal: false,
            });
        }
        self.set_status(status, now);
        changes.status_changed = Some((previous, status));
    }

    /// Customer rating after resolution.
    pub fn rate(&mut self, rating: i64, feedback: Option<String>, now: DateTime<Utc>) -> CoreResult<()> {
        validate_rating(rating)?;
        self.rating = Some(rating);
        self.feedback = feedback.map(|f| f.trim().to_string()).filter(|f| !f.is_empty());
        self.updated_at = now;
        Ok(())
    }
}

// =============================================================================
// Assistant
// =============================================================================

const STOP_WORDS: &[&str] = &[
    "el", "la", "de", "que", "y", "a", "en", "un", "es", "se", "no", "te", "lo", "le", "da",
    "su", "por", "son", "con", "para", "como", "las", "del", "los", "una", "pero", "sus",
    "ese", "está", "han", "hay", "o", "ser", "al", "me", "mi", "ti", "tu", "más", "ya", "si",
];

const MAX_KEYWORDS: usize = 5;
pub const MAX_ARTICLES: usize = 3;
pub const MAX_FAQS: usize = 2;

/// Lowercased words longer than two characters, minus stop words, at most five.
pub fn extract_keywords(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(w))
        .take(MAX_KEYWORDS)
        .map(str::to_string)
        .collect()
}

/// Term the knowledge base and FAQs are searched with: the first extracted
/// keyword, or the whole trimmed lowercased message when none survive.
pub fn search_term(message: &str) -> String {
    extract_keywords(message)
        .into_iter()
        .next()
        .unwrap_or_else(|| message.trim().to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Order,
    Payment,
    Shipping,
    Product,
    Account,
    Contact,
    General,
}

const INTENTS: &[(Intent, &[&str])] = &[
    (Intent::Order, &["pedido", "orden", "compra", "estado"]),
    (Intent::Payment, &["pago", "transferencia", "webpay", "tarjeta"]),
    (Intent::Shipping, &["envío", "entrega", "despacho", "delivery"]),
    (Intent::Product, &["producto", "galleta", "ingredientes", "alérgico"]),
    (Intent::Account, &["cuenta", "perfil", "contraseña", "email"]),
    (Intent::Contact, &["horario", "contacto", "teléfono", "dirección"]),
];

/// First intent whose keyword appears in the lowercased message.
pub fn detect_intent(message: &str) -> Intent {
    let lower = message.to_lowercase();
    INTENTS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::General)
}

impl Intent {
    pub fn canned_response(&self) -> &'static str {
        match self {
            Intent::Order => "¡Hola! Te ayudo con tu consulta sobre pedidos.\n\n\
                Estados de pedido:\n\
                - Pendiente: tu pedido está confirmado y en cola de preparación\n\
                - En preparación: estamos horneando tus galletas\n\
                - Enviado: tu pedido está en camino\n\
                - Entregado: ¡disfruta tus galletas!\n\n\
                Puedes revisar el estado en \"Mis Pedidos\". Para cambios o cancelaciones, contáctanos lo antes posible.",
            Intent::Payment => "Métodos de pago disponibles:\n\
                - Webpay Plus: pago inmediato con tarjetas\n\
                - Transferencia bancaria: envía tu comprobante para verificación\n\
                - Pago contra entrega\n\n\
                Verificamos las transferencias en un máximo de 24 horas. Asegúrate de que el monto sea exacto.",
            Intent::Shipping => "Información de envíos:\n\
                - Región Metropolitana: 1-2 días hábiles\n\
                - V Región: 2-3 días hábiles\n\
                - Otras regiones: 3-5 días hábiles\n\n\
                El envío es gratis en compras desde $15.000. Recibirás un email con el código de seguimiento.",
            Intent::Product => "Nuestras galletas artesanales usan ingredientes naturales y recetas familiares, sin conservantes artificiales.\n\n\
                Todos nuestros productos pueden contener trazas de frutos secos. \
                Contáctanos para consultas específicas sobre alergias.",
            Intent::Account => "Gestión de cuenta:\n\
                - ¿Olvidaste tu contraseña? Usa \"Recuperar Contraseña\"\n\
                - Puedes cambiar tus datos en \"Mi Perfil\"\n\
                - Revisa tu carpeta de spam para emails de confirmación",
            Intent::Contact => "Horario de atención: lunes a viernes 9:00-18:00, sábados 9:00-14:00.\n\n\
                Escríbenos a soporte@dulcebias.cl o por WhatsApp en horario comercial. \
                Este chat está disponible 24/7.",
            Intent::General => "¡Hola! Soy el asistente virtual de Dulce Bias.\n\n\
                Te puedo ayudar con pedidos, pagos, envíos, productos, tu cuenta o datos de contacto. \
                ¿Podrías contarme un poco más sobre tu consulta?",
        }
    }
}

/// What the assistant answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct AssistantReply {
    pub response: String,
    pub intent: Intent,
    pub confidence: f64,
    pub should_escalate: bool,
    pub tokens_used: i64,
    pub article_titles: Vec<String>,
    pub faq_questions: Vec<String>,
}

impl AssistantReply {
    /// Reply used when the lookup behind the assistant failed.
    pub fn fallback() -> Self {
        AssistantReply {
            response: "Lo siento, hay un problema técnico. Un agente humano te ayudará pronto."
                .to_string(),
            intent: Intent::General,
            confidence: 0.0,
            should_escalate: true,
            tokens_used: 0,
            article_titles: Vec::new(),
            faq_questions: Vec::new(),
        }
    }
}

pub const ESCALATION_THRESHOLD: f64 = 0.7;

pub fn confidence(has_articles: bool, has_faqs: bool, response_len: usize) -> f64 {
    let mut c = 0.5;
    if has_articles {
        c += 0.2;
    }
    if has_faqs {
        c += 0.2;
    }
    if response_len > 100 {
        c += 0.1;
    }
    f64::min(c, 1.0)
}

fn word_count(text: &str) -> i64 {
    text.split_whitespace().count() as i64
}

/// Keyword responder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Assistant;

impl Assistant {
    /// Answers `message` given the articles and FAQs found for its keywords.
    ///
    /// Only active entries count, and at most [`MAX_ARTICLES`] / [`MAX_FAQS`].
    pub fn respond(
        &self,
        message: &str,
        articles: &[KnowledgeBaseArticle],
        faqs: &[Faq],
    ) -> CoreResult<AssistantReply> {
        validate_required("message", message, 2000)?;

        let intent = detect_intent(message);
        let article_titles: Vec<String> = articles
            .iter()
            .filter(|a| a.is_active)
            .take(MAX_ARTICLES)
            .map(|a| a.title.clone())
            .collect();
        let faq_questions: Vec<String> = faqs
            .iter()
            .filter(|f| f.is_active)
            .take(MAX_FAQS)
            .map(|f| f.question.clone())
            .collect();

        let mut response = intent.canned_response().to_string();
        if !article_titles.is_empty() {
            response.push_str("\n\nArtículos que pueden ayudarte:");
            for title in &article_titles {
                response.push_str("\n- ");
                response.push_str(title);
            }
        }
        if !faq_questions.is_empty() {
            response.push_str("\n\nPreguntas frecuentes relacionadas:");
            for question in &faq_questions {
                response.push_str("\n- ");
                response.push_str(question);
            }
        }

        let confidence = confidence(
            !article_titles.is_empty(),
            !faq_questions.is_empty(),
            response.chars().count(),
        );

        Ok(AssistantReply {
            tokens_used: word_count(message) + word_count(&response),
            should_escalate: confidence < ESCALATION_THRESHOLD,
            response,
            intent,
            confidence,
            article_titles,
            faq_questions,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
