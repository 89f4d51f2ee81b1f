//! # Support Repository
//!
//! Tickets with their message threads, the knowledge base the assistant
//! searches, FAQs and quick-chat conversations.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::begin_write;
use dulce_core::order::Actor;
use dulce_core::support::{
    generate_ticket_number, AIConversation, AssistantReply, Faq, KnowledgeBaseArticle,
    MessageType, NewTicket, SupportCategory, SupportMessage, SupportTicket, SystemNote,
    TicketChanges, TicketStatus, TicketUpdate, MAX_ARTICLES, MAX_FAQS,
};
use dulce_core::validation::validate_required;

const TICKET_NUMBER_ATTEMPTS: u32 = 5;

/// A new message before it is stored.
struct MessageDraft<'a> {
    sender_id: Option<&'a str>,
    message_type: MessageType,
    content: &'a str,
    previous_status: Option<TicketStatus>,
    new_status: Option<TicketStatus>,
    is_internal: bool,
    ai_tokens_used: i64,
}

impl<'a> MessageDraft<'a> {
    fn plain(sender_id: Option<&'a str>, message_type: MessageType, content: &'a str) -> Self {
        MessageDraft {
            sender_id,
            message_type,
            content,
            previous_status: None,
            new_status: None,
            is_internal: false,
            ai_tokens_used: 0,
        }
    }

    fn from_note(note: &'a SystemNote, sender_id: Option<&'a str>) -> Self {
        MessageDraft {
            sender_id,
            message_type: note.message_type,
            content: &note.content,
            previous_status: note.previous_status,
            new_status: note.new_status,
            is_internal: note.is_internal,
            ai_tokens_used: 0,
        }
    }
}

async fn insert_message(
    conn: &mut SqliteConnection,
    ticket_id: &str,
    draft: MessageDraft<'_>,
    now: DateTime<Utc>,
) -> DbResult<SupportMessage> {
    let message = SupportMessage {
        id: Uuid::new_v4().to_string(),
        ticket_id: ticket_id.to_string(),
        sender_id: draft.sender_id.map(str::to_string),
        message_type: draft.message_type,
        content: draft.content.to_string(),
        previous_status: draft.previous_status,
        new_status: draft.new_status,
        is_internal: draft.is_internal,
        ai_tokens_used: draft.ai_tokens_used,
        created_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO support_messages (
            id, ticket_id, sender_id, message_type, content, previous_status,
            new_status, is_internal, ai_tokens_used, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&message.id)
    .bind(&message.ticket_id)
    .bind(&message.sender_id)
    .bind(message.message_type)
    .bind(&message.content)
    .bind(message.previous_status)
    .bind(message.new_status)
    .bind(message.is_internal)
    .bind(message.ai_tokens_used)
    .bind(message.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(message)
}

async fn get_ticket_in(conn: &mut SqliteConnection, ticket_id: &str) -> DbResult<SupportTicket> {
    sqlx::query_as::<_, SupportTicket>("SELECT * FROM support_tickets WHERE id = ?")
        .bind(ticket_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("SupportTicket", ticket_id))
}

async fn save_ticket(conn: &mut SqliteConnection, ticket: &SupportTicket) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE support_tickets
        SET status = ?, priority = ?, ai_response = ?, ai_confidence = ?, is_resolved = ?,
            rating = ?, feedback = ?, assigned_to = ?, updated_at = ?, resolved_at = ?
        WHERE id = ?
        "#,
    )
    .bind(ticket.status)
    .bind(ticket.priority)
    .bind(&ticket.ai_response)
    .bind(ticket.ai_confidence)
    .bind(ticket.is_resolved)
    .bind(ticket.rating)
    .bind(&ticket.feedback)
    .bind(&ticket.assigned_to)
    .bind(ticket.updated_at)
    .bind(ticket.resolved_at)
    .bind(&ticket.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn store_changes(
    conn: &mut SqliteConnection,
    ticket_id: &str,
    changes: &TicketChanges,
    sender_id: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<Vec<SupportMessage>> {
    let mut stored = Vec::with_capacity(changes.notes.len());
    for note in &changes.notes {
        stored.push(insert_message(conn, ticket_id, MessageDraft::from_note(note, sender_id), now).await?);
    }
    Ok(stored)
}

#[derive(Debug, Clone)]
pub struct SupportRepository {
    pool: SqlitePool,
}

impl SupportRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SupportRepository { pool }
    }

    pub async fn categories(&self) -> DbResult<Vec<SupportCategory>> {
        let rows = sqlx::query_as::<_, SupportCategory>(
            "SELECT * FROM support_categories WHERE is_active = 1 ORDER BY sort_order, name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -------------------------------------------------------------------------
    // Tickets
    // -------------------------------------------------------------------------

    /// Opens a ticket; the description becomes its first message.
    pub async fn create_ticket(&self, user_id: &str, new: &NewTicket) -> DbResult<SupportTicket> {
        new.validate()?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_create_ticket(user_id, new).await {
                Err(e)
                    if e.is_unique_violation_on("support_tickets.ticket_number")
                        && attempt < TICKET_NUMBER_ATTEMPTS =>
                {
                    warn!(attempt, "Ticket number collision, retrying");
                }
                result => return result,
            }
        }
    }

    async fn try_create_ticket(&self, user_id: &str, new: &NewTicket) -> DbResult<SupportTicket> {
        let now = Utc::now();
        let ticket = SupportTicket {
            id: Uuid::new_v4().to_string(),
            ticket_number: generate_ticket_number(),
            user_id: user_id.to_string(),
            category_id: new.category_id.clone(),
            subject: new.subject.trim().to_string(),
            description: new.description.trim().to_string(),
            status: TicketStatus::Open,
            priority: new.priority.unwrap_or_default(),
            ai_response: None,
            ai_confidence: 0.0,
            is_resolved: false,
            rating: None,
            feedback: None,
            assigned_to: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        };

        let mut tx = begin_write(&self.pool).await?;
        sqlx::query(
            r#"
            INSERT INTO support_tickets (
                id, ticket_number, user_id, category_id, subject, description, status,
                priority, ai_confidence, is_resolved, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&ticket.id)
        .bind(&ticket.ticket_number)
        .bind(&ticket.user_id)
        .bind(&ticket.category_id)
        .bind(&ticket.subject)
        .bind(&ticket.description)
        .bind(ticket.status)
        .bind(ticket.priority)
        .bind(ticket.ai_confidence)
        .bind(ticket.is_resolved)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(&mut *tx)
        .await?;

        insert_message(
            &mut tx,
            &ticket.id,
            MessageDraft::plain(Some(user_id), MessageType::User, &ticket.description),
            now,
        )
        .await?;
        tx.commit().await?;

        info!(ticket_number = %ticket.ticket_number, priority = ?ticket.priority, "Ticket created");
        Ok(ticket)
    }

    pub async fn get(&self, ticket_id: &str) -> DbResult<Option<SupportTicket>> {
        let row = sqlx::query_as::<_, SupportTicket>("SELECT * FROM support_tickets WHERE id = ?")
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_by_number(&self, ticket_number: &str) -> DbResult<Option<SupportTicket>> {
        let row = sqlx::query_as::<_, SupportTicket>(
            "SELECT * FROM support_tickets WHERE ticket_number = ?",
        )
        .bind(ticket_number.trim().to_uppercase())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<SupportTicket>> {
        let rows = sqlx::query_as::<_, SupportTicket>(
            "SELECT * FROM support_tickets WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Staff queue, optionally by status.
    pub async fn list(&self, status: Option<TicketStatus>, limit: i64) -> DbResult<Vec<SupportTicket>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, SupportTicket>(
                    "SELECT * FROM support_tickets WHERE status = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, SupportTicket>(
                    "SELECT * FROM support_tickets ORDER BY created_at DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    /// The thread in order. Customers do not see internal notes.
    pub async fn messages(&self, ticket_id: &str, include_internal: bool) -> DbResult<Vec<SupportMessage>> {
        let rows = sqlx::query_as::<_, SupportMessage>(
            r#"
            SELECT * FROM support_messages
            WHERE ticket_id = ? AND (? OR is_internal = 0)
            ORDER BY created_at, rowid
            "#,
        )
        .bind(ticket_id)
        .bind(include_internal)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// A customer message on their own ticket.
    pub async fn add_user_message(
        &self,
        ticket_id: &str,
        user_id: &str,
        content: &str,
    ) -> DbResult<SupportMessage> {
        validate_required("content", content, 5000)?;
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;

        let mut ticket = get_ticket_in(&mut tx, ticket_id).await?;
        if ticket.user_id != user_id {
            return Err(DbError::not_found("SupportTicket", ticket_id));
        }

        let message = insert_message(
            &mut tx,
            ticket_id,
            MessageDraft::plain(Some(user_id), MessageType::User, content.trim()),
            now,
        )
        .await?;
        ticket.updated_at = now;
        save_ticket(&mut tx, &ticket).await?;
        tx.commit().await?;

        debug!(ticket_number = %ticket.ticket_number, "Customer message added");
        Ok(message)
    }

    /// Stores an assistant answer on a ticket.
    pub async fn record_ai_reply(
        &self,
        ticket_id: &str,
        reply: &AssistantReply,
    ) -> DbResult<(SupportTicket, SupportMessage)> {
        let now = Utc::now();
        let mut tx = begin_write(&self.pool).await?;
        let mut ticket = get_ticket_in(&mut tx, ticket_id).await?;

        let mut draft = MessageDraft::plain(None, MessageType::Ai, &reply.response);
        draft.ai_tokens_used = reply.tokens_used;
        let message = insert_message(&mut tx, ticket_id, draft, now).await?;

        ticket.ai_response = Some(reply.response.clone());
        ticket.ai_confidence = reply.confidence;
        ticket.updated_at = now;
        save_ticket(&mut tx, &ticket).await?;
        tx.commit().await?;

        info!(
            ticket_number = %ticket.ticket_number,
            confidence = reply.confidence,
            escalate = reply.should_escalate,
            "Assistant replied on ticket"
        );
        Ok((ticket, message))
    }

    /// Staff reply. An open ticket moves to in progress unless
    /// `requested_status` says otherwise.
    pub async fn staff_reply(
        &self,
        ticket_id: &str,
        staff: &Actor,
        content: &str,
        requested_status: Option<TicketStatus>,
    ) -> DbResult<(SupportTicket, Vec<SupportMessage>, TicketChanges)> {
        validate_required("content", content, 5000)?;
        let now = Utc::now();
        let sender = staff.label();
        let mut tx = begin_write(&self.pool).await?;
        let mut ticket = get_ticket_in(&mut tx, ticket_id).await?;

        let mut stored = vec![
            insert_message(
                &mut tx,
                ticket_id,
                MessageDraft::plain(Some(&sender), MessageType::Human, content.trim()),
                now,
            )
            .await?,
        ];
        let changes = ticket.apply_staff_reply(requested_status, now);
        stored.extend(store_changes(&mut tx, ticket_id, &changes, Some(&sender), now).await?);
        save_ticket(&mut tx, &ticket).await?;
        tx.commit().await?;

        info!(ticket_number = %ticket.ticket_number, status = %ticket.status, "Staff replied");
        Ok((ticket, stored, changes))
    }

    /// Staff status / priority / assignment update.
    pub async fn apply_update(
        &self,
        ticket_id: &str,
        update: &TicketUpdate,
        staff: &Actor,
    ) -> DbResult<(SupportTicket, TicketChanges)> {
        let now = Utc::now();
        let sender = staff.label();
        let mut tx = begin_write(&self.pool).await?;
        let mut ticket = get_ticket_in(&mut tx, ticket_id).await?;

        let changes = ticket.apply_update(update, now);
        store_changes(&mut tx, ticket_id, &changes, Some(&sender), now).await?;
        save_ticket(&mut tx, &ticket).await?;
        tx.commit().await?;

        if let Some((from, to)) = changes.status_changed {
            info!(ticket_number = %ticket.ticket_number, %from, %to, "Ticket status changed");
        }
        Ok((ticket, changes))
    }

    /// Customer rating of their own ticket.
    pub async fn rate(
        &self,
        ticket_id: &str,
        user_id: &str,
        rating: i64,
        feedback: Option<String>,
    ) -> DbResult<SupportTicket> {
        let mut tx = begin_write(&self.pool).await?;
        let mut ticket = get_ticket_in(&mut tx, ticket_id).await?;
        if ticket.user_id != user_id {
            return Err(DbError::not_found("SupportTicket", ticket_id));
        }

        ticket.rate(rating, feedback, Utc::now())?;
        save_ticket(&mut tx, &ticket).await?;
        tx.commit().await?;

        info!(ticket_number = %ticket.ticket_number, rating, "Ticket rated");
        Ok(ticket)
    }

    // -------------------------------------------------------------------------
    // Knowledge Base
    // -------------------------------------------------------------------------

    /// Active articles and FAQs matching the search term (see
    /// `search_term`), capped at what the assistant cites. Cited articles
    /// have `times_used` bumped.
    pub async fn find_knowledge(&self, term: &str) -> DbResult<(Vec<KnowledgeBaseArticle>, Vec<Faq>)> {
        if term.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let articles: Vec<KnowledgeBaseArticle> = sqlx::query_as::<_, KnowledgeBaseArticle>(
            "SELECT * FROM knowledge_base_articles WHERE is_active = 1 ORDER BY times_used DESC, created_at",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .filter(|a| a.matches(term))
        .take(MAX_ARTICLES)
        .collect();

        let faqs: Vec<Faq> = sqlx::query_as::<_, Faq>(
            "SELECT * FROM faqs WHERE is_active = 1 ORDER BY sort_order, question",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .filter(|f| f.matches(term))
        .take(MAX_FAQS)
        .collect();

        for article in &articles {
            sqlx::query("UPDATE knowledge_base_articles SET times_used = times_used + 1 WHERE id = ?")
                .bind(&article.id)
                .execute(&self.pool)
                .await?;
        }

        debug!(
            keywords = ?term,
            articles = articles.len(),
            faqs = faqs.len(),
            "Knowledge lookup"
        );
        Ok((articles, faqs))
    }

    pub async fn insert_article(&self, article: &KnowledgeBaseArticle) -> DbResult<()> {
        validate_required("title", &article.title, 200)?;
        sqlx::query(
            r#"
            INSERT INTO knowledge_base_articles (
                id, category_id, title, content, keywords, embedding_vector, times_used, is_active, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&article.id)
        .bind(&article.category_id)
        .bind(&article.title)
        .bind(&article.content)
        .bind(&article.keywords)
        .bind(&article.embedding_vector)
        .bind(article.times_used)
        .bind(article.is_active)
        .bind(article.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_faq(&self, faq: &Faq) -> DbResult<()> {
        validate_required("question", &faq.question, 300)?;
        sqlx::query(
            r#"
            INSERT INTO faqs (id, category_id, question, answer, helpful_votes, not_helpful_votes, is_active, sort_order)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&faq.id)
        .bind(&faq.category_id)
        .bind(&faq.question)
        .bind(&faq.answer)
        .bind(faq.helpful_votes)
        .bind(faq.not_helpful_votes)
        .bind(faq.is_active)
        .bind(faq.sort_order)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_faqs(&self, category_id: Option<&str>) -> DbResult<Vec<Faq>> {
        let rows = sqlx::query_as::<_, Faq>(
            r#"
            SELECT * FROM faqs
            WHERE is_active = 1 AND (? IS NULL OR category_id = ?)
            ORDER BY sort_order, question
            "#,
        )
        .bind(category_id)
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Records a helpful / not helpful vote.
    pub async fn vote_faq(&self, faq_id: &str, helpful: bool) -> DbResult<Faq> {
        let column = if helpful { "helpful_votes" } else { "not_helpful_votes" };
        let sql = format!(
            "UPDATE faqs SET {column} = {column} + 1 WHERE id = ? AND is_active = 1 RETURNING *"
        );
        sqlx::query_as::<_, Faq>(&sql)
            .bind(faq_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Faq", faq_id))
    }

    // -------------------------------------------------------------------------
    // Quick Chat
    // -------------------------------------------------------------------------

    /// The user's conversation for a chat session, created on first use.
    pub async fn conversation(&self, user_id: &str, session_id: &str) -> DbResult<AIConversation> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO ai_conversations (id, session_id, user_id, messages, created_at, updated_at)
            VALUES (?, ?, ?, '[]', ?, ?)
            ON CONFLICT(user_id, session_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session_id)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, AIConversation>(
            "SELECT * FROM ai_conversations WHERE user_id = ? AND session_id = ?",
        )
        .bind(user_id)
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn save_conversation(&self, conversation: &AIConversation) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE ai_conversations
            SET messages = ?, total_messages = ?, total_tokens = ?, escalated_to_human = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&conversation.messages)
        .bind(conversation.total_messages)
        .bind(conversation.total_tokens)
        .bind(conversation.escalated_to_human)
        .bind(conversation.updated_at)
        .bind(&conversation.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
