//! # Support Service
//!
//! Tickets, the keyword assistant and FAQs.
//!
//! ## Assistant Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  message ──► search_term (first keyword, else the whole message)       │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │          find_knowledge ──── lookup failed ──► AssistantReply::fallback │
//! │          (≤ 3 articles,                         (confidence 0,          │
//! │           ≤ 2 FAQs)                              escalates)             │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │          Assistant::respond                                             │
//! │          intent canned text + suggestions, confidence, escalation      │
//! │                 │                                                       │
//! │       ┌─────────┴──────────┐                                            │
//! │       ▼                    ▼                                            │
//! │  on a ticket:         quick chat:                                       │
//! │  `ai` message,        AIConversation for signed-in users               │
//! │  ai_response/         (user, session)                                   │
//! │  ai_confidence                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use dulce_core::order::Actor;
use dulce_core::support::{
    search_term, Assistant, AssistantReply, Faq, NewTicket, SupportCategory, SupportMessage,
    SupportTicket, TicketStatus, TicketUpdate,
};
use dulce_db::Database;

use super::require_staff;
use crate::config::StorefrontConfig;
use crate::error::{ApiError, ApiResult};
use crate::notify::Notifier;

/// A ticket and the messages the viewer may see.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketThread {
    pub ticket: SupportTicket,
    pub messages: Vec<SupportMessage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub reply: AssistantReply,
    /// Set for signed-in users, whose exchanges are kept.
    pub conversation_id: Option<String>,
}

pub struct SupportService {
    db: Database,
    config: Arc<StorefrontConfig>,
}

impl SupportService {
    pub fn new(db: Database, config: Arc<StorefrontConfig>) -> Self {
        SupportService { db, config }
    }

    fn notifier(&self) -> Notifier {
        Notifier::new(self.db.clone(), self.config.clone())
    }

    pub async fn categories(&self) -> ApiResult<Vec<SupportCategory>> {
        Ok(self.db.support().categories().await?)
    }

    // =========================================================================
    // Tickets
    // =========================================================================

    /// Opens a ticket and emails its number to `email`.
    pub async fn create_ticket(
        &self,
        user_id: &str,
        email: Option<&str>,
        new: &NewTicket,
    ) -> ApiResult<SupportTicket> {
        let ticket = self.db.support().create_ticket(user_id, new).await?;
        self.notifier().ticket_created(&ticket, email).await;
        Ok(ticket)
    }

    /// A ticket with its messages. Customers only see their own tickets
    /// and never internal notes.
    pub async fn thread(&self, ticket_id: &str, actor: &Actor) -> ApiResult<TicketThread> {
        let ticket = self.visible_ticket(ticket_id, actor).await?;
        let messages = self.db.support().messages(&ticket.id, actor.is_staff).await?;
        Ok(TicketThread { ticket, messages })
    }

    pub async fn thread_by_number(&self, ticket_number: &str, actor: &Actor) -> ApiResult<TicketThread> {
        let ticket = self
            .db
            .support()
            .get_by_number(ticket_number)
            .await?
            .ok_or_else(|| ApiError::not_found("SupportTicket", ticket_number))?;
        self.thread(&ticket.id, actor).await
    }

    pub async fn my_tickets(&self, user_id: &str) -> ApiResult<Vec<SupportTicket>> {
        Ok(self.db.support().list_for_user(user_id).await?)
    }

    pub async fn list(
        &self,
        status: Option<TicketStatus>,
        limit: i64,
        actor: &Actor,
    ) -> ApiResult<Vec<SupportTicket>> {
        require_staff(actor)?;
        Ok(self.db.support().list(status, limit).await?)
    }

    pub async fn post_message(
        &self,
        ticket_id: &str,
        user_id: &str,
        content: &str,
    ) -> ApiResult<SupportMessage> {
        Ok(self
            .db
            .support()
            .add_user_message(ticket_id, user_id, content)
            .await?)
    }

    /// Has the assistant answer `question` on the ticket.
    pub async fn ask_assistant(
        &self,
        ticket_id: &str,
        actor: &Actor,
        question: &str,
    ) -> ApiResult<(SupportTicket, SupportMessage)> {
        self.visible_ticket(ticket_id, actor).await?;
        let reply = self.answer(question).await?;
        Ok(self.db.support().record_ai_reply(ticket_id, &reply).await?)
    }

    /// Staff reply; the customer hears about it at `email`.
    pub async fn staff_reply(
        &self,
        ticket_id: &str,
        staff: &Actor,
        content: &str,
        status: Option<TicketStatus>,
        email: Option<&str>,
    ) -> ApiResult<TicketThread> {
        require_staff(staff)?;
        let (ticket, messages, _changes) = self
            .db
            .support()
            .staff_reply(ticket_id, staff, content, status)
            .await?;

        self.notifier()
            .ticket_updated(&ticket, email, Some(content.trim()))
            .await;
        Ok(TicketThread { ticket, messages })
    }

    /// Staff status, priority or assignment change. Only a status change
    /// reaches the customer.
    pub async fn update_ticket(
        &self,
        ticket_id: &str,
        update: &TicketUpdate,
        staff: &Actor,
        email: Option<&str>,
    ) -> ApiResult<SupportTicket> {
        require_staff(staff)?;
        let (ticket, changes) = self
            .db
            .support()
            .apply_update(ticket_id, update, staff)
            .await?;

        if changes.status_changed.is_some() {
            self.notifier().ticket_updated(&ticket, email, None).await;
        }
        Ok(ticket)
    }

    /// 1 to 5 stars on the customer's own ticket.
    pub async fn rate(
        &self,
        ticket_id: &str,
        user_id: &str,
        rating: i64,
        feedback: Option<String>,
    ) -> ApiResult<SupportTicket> {
        Ok(self
            .db
            .support()
            .rate(ticket_id, user_id, rating, feedback)
            .await?)
    }

    async fn visible_ticket(&self, ticket_id: &str, actor: &Actor) -> ApiResult<SupportTicket> {
        self.db
            .support()
            .get(ticket_id)
            .await?
            .filter(|t| actor.is_staff || actor.user_id.as_deref() == Some(t.user_id.as_str()))
            .ok_or_else(|| ApiError::not_found("SupportTicket", ticket_id))
    }

    // =========================================================================
    // Assistant
    // =========================================================================

    /// Free-form question outside a ticket. Signed-in users keep the
    /// exchange in their conversation for `session_id`.
    pub async fn quick_chat(
        &self,
        message: &str,
        user_id: Option<&str>,
        session_id: &str,
    ) -> ApiResult<ChatReply> {
        let reply = self.answer(message).await?;

        let conversation_id = match user_id {
            Some(user_id) => {
                let mut conversation = self.db.support().conversation(user_id, session_id).await?;
                conversation.record_exchange(message.trim(), &reply, Utc::now())?;
                self.db.support().save_conversation(&conversation).await?;
                Some(conversation.id)
            }
            None => None,
        };

        Ok(ChatReply {
            reply,
            conversation_id,
        })
    }

    async fn answer(&self, message: &str) -> ApiResult<AssistantReply> {
        let term = search_term(message);
        debug!(term = %term, "Assistant lookup");

        match self.db.support().find_knowledge(&term).await {
            Ok((articles, faqs)) => Ok(Assistant.respond(message, &articles, &faqs)?),
            Err(e) => {
                warn!(error = %e, "Knowledge lookup failed, using fallback reply");
                Ok(AssistantReply::fallback())
            }
        }
    }

    // =========================================================================
    // FAQs
    // =========================================================================

    pub async fn faqs(&self, category_id: Option<&str>) -> ApiResult<Vec<Faq>> {
        Ok(self.db.support().list_faqs(category_id).await?)
    }

    pub async fn vote_faq(&self, faq_id: &str, helpful: bool) -> ApiResult<Faq> {
        Ok(self.db.support().vote_faq(faq_id, helpful).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::test_support::test_storefront;
    use dulce_core::support::{Intent, KnowledgeBaseArticle, MessageType, TicketPriority};

    fn new_ticket() -> NewTicket {
        NewTicket {
            category_id: None,
            subject: "Pedido atrasado".into(),
            description: "Mi pedido no ha llegado".into(),
            priority: None,
        }
    }

    fn faq(id: &str, question: &str) -> Faq {
        Faq {
            id: id.into(),
            category_id: None,
            question: question.into(),
            answer: "Entre 2 y 4 días hábiles.".into(),
            helpful_votes: 0,
            not_helpful_votes: 0,
            is_active: true,
            sort_order: 1,
        }
    }

    #[tokio::test]
    async fn test_create_ticket_notifies_customer() {
        let sf = test_storefront().await;
        let ticket = sf
            .support()
            .create_ticket("u1", Some("kati@example.cl"), &new_ticket())
            .await
            .unwrap();
        assert!(ticket.ticket_number.starts_with("TK-"));
        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(sf.db().notifications().pending_count().await.unwrap(), 1);

        let thread = sf.support().thread(&ticket.id, &Actor::customer("u1")).await.unwrap();
        assert_eq!(thread.messages.len(), 1);
        assert_eq!(thread.messages[0].message_type, MessageType::User);

        let err = sf.support().thread(&ticket.id, &Actor::customer("u2")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_assistant_on_ticket_cites_knowledge() {
        let sf = test_storefront().await;
        sf.db()
            .support()
            .insert_article(&KnowledgeBaseArticle {
                id: "kb1".into(),
                category_id: None,
                title: "Seguimiento de pedidos".into(),
                content: "Revisa Mis Pedidos.".into(),
                keywords: "pedido, seguimiento".into(),
                embedding_vector: None,
                times_used: 0,
                is_active: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        sf.db().support().insert_faq(&faq("f1", "¿Cuándo llega mi pedido?")).await.unwrap();

        let ticket = sf.support().create_ticket("u1", None, &new_ticket()).await.unwrap();
        let (ticket, message) = sf
            .support()
            .ask_assistant(&ticket.id, &Actor::customer("u1"), "Mi pedido no aparece, ¿dónde está?")
            .await
            .unwrap();
        assert_eq!(message.message_type, MessageType::Ai);
        assert!(message.content.contains("Seguimiento de pedidos"));
        assert!((ticket.ai_confidence - 1.0).abs() < 1e-9);
        assert!(message.ai_tokens_used > 0);
    }

    #[tokio::test]
    async fn test_staff_reply_moves_to_in_progress() {
        let sf = test_storefront().await;
        let ticket = sf.support().create_ticket("u1", None, &new_ticket()).await.unwrap();

        let err = sf
            .support()
            .staff_reply(&ticket.id, &Actor::customer("u1"), "Hola", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BusinessLogic);

        let thread = sf
            .support()
            .staff_reply(&ticket.id, &Actor::staff("kati"), "Ya va en camino", None, Some("kati@example.cl"))
            .await
            .unwrap();
        assert_eq!(thread.ticket.status, TicketStatus::InProgress);
        assert_eq!(thread.messages[0].message_type, MessageType::Human);
        // Creation notice plus the reply.
        assert_eq!(sf.db().notifications().pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_priority_update_does_not_notify() {
        let sf = test_storefront().await;
        let ticket = sf.support().create_ticket("u1", None, &new_ticket()).await.unwrap();
        let staff = Actor::staff("kati");

        let update = TicketUpdate {
            priority: Some(TicketPriority::High),
            ..TicketUpdate::default()
        };
        sf.support()
            .update_ticket(&ticket.id, &update, &staff, Some("kati@example.cl"))
            .await
            .unwrap();
        assert_eq!(sf.db().notifications().pending_count().await.unwrap(), 1);

        let resolve = TicketUpdate {
            status: Some(TicketStatus::Resolved),
            ..TicketUpdate::default()
        };
        let resolved = sf
            .support()
            .update_ticket(&ticket.id, &resolve, &staff, Some("kati@example.cl"))
            .await
            .unwrap();
        assert!(resolved.is_resolved);
        assert!(resolved.resolved_at.is_some());
        assert_eq!(sf.db().notifications().pending_count().await.unwrap(), 2);

        let rated = sf
            .support()
            .rate(&ticket.id, "u1", 5, Some("Muy rápido".into()))
            .await
            .unwrap();
        assert_eq!(rated.rating, Some(5));
        assert!(sf.support().rate(&ticket.id, "u1", 6, None).await.is_err());
    }

    #[tokio::test]
    async fn test_quick_chat_keeps_conversation_for_users() {
        let sf = test_storefront().await;

        let guest = sf.support().quick_chat("¿Aceptan webpay?", None, "s1").await.unwrap();
        assert_eq!(guest.reply.intent, Intent::Payment);
        assert!(guest.reply.should_escalate);
        assert!(guest.conversation_id.is_none());

        let first = sf.support().quick_chat("¿Aceptan webpay?", Some("u1"), "s1").await.unwrap();
        sf.support().quick_chat("¿Horario de atención?", Some("u1"), "s1").await.unwrap();

        let conversation = sf.db().support().conversation("u1", "s1").await.unwrap();
        assert_eq!(Some(conversation.id.clone()), first.conversation_id);
        assert_eq!(conversation.total_messages, 4);
        assert!(conversation.escalated_to_human);

        let err = sf.support().quick_chat("   ", None, "s1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_faq_votes() {
        let sf = test_storefront().await;
        sf.db().support().insert_faq(&faq("f1", "¿Hacen envíos a regiones?")).await.unwrap();

        sf.support().vote_faq("f1", true).await.unwrap();
        sf.support().vote_faq("f1", true).await.unwrap();
        let faq = sf.support().vote_faq("f1", false).await.unwrap();
        assert_eq!((faq.helpful_votes, faq.not_helpful_votes), (2, 1));
        assert!((faq.helpfulness_ratio() - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(sf.support().faqs(None).await.unwrap().len(), 1);
    }
}
