//! Historial de la conversación durante la vida del proceso.
//!
//! Cada pregunta toma un ticket de llegada al entrar. Un turno sólo se
//! publica cuando todos los tickets anteriores se han registrado o
//! abandonado, así que el historial visible crece únicamente por el final y
//! en orden de llegada, aunque las respuestas concurrentes acaben en otro
//! orden. Los turnos publicados nunca se borran ni se mueven.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::ConversationTurn;

/// Reserva de posición para una pregunta en curso.
///
/// Si se suelta sin pasar por `ConversationState::record` (error o petición
/// cancelada) su posición se libera sin dejar turno.
#[derive(Debug)]
pub struct TurnTicket<'a> {
    state: &'a ConversationState,
    sequence: u64,
    asked_at: DateTime<Utc>,
    settled: bool,
}

impl TurnTicket<'_> {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Drop for TurnTicket<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.state.settle(self.sequence, None);
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    published: Vec<ConversationTurn>,
    /// Tickets ya resueltos que esperan a uno anterior todavía en curso.
    waiting: BTreeMap<u64, Option<ConversationTurn>>,
    next_to_publish: u64,
}

#[derive(Debug, Default)]
pub struct ConversationState {
    next_sequence: AtomicU64,
    ledger: Mutex<Ledger>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_turn(&self) -> TurnTicket<'_> {
        TurnTicket {
            state: self,
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            asked_at: Utc::now(),
            settled: false,
        }
    }

    /// Registra el turno completo. Consume el ticket, así que cada pregunta se registra una sola vez.
    pub fn record(&self, mut ticket: TurnTicket<'_>, question: &str, answer: &str) -> ConversationTurn {
        let turn = ConversationTurn {
            id: Uuid::new_v4(),
            sequence: ticket.sequence,
            question: question.to_string(),
            answer: answer.to_string(),
            asked_at: ticket.asked_at,
            answered_at: Utc::now(),
        };
        ticket.settled = true;
        self.settle(ticket.sequence, Some(turn.clone()));
        turn
    }

    fn settle(&self, sequence: u64, turn: Option<ConversationTurn>) {
        let mut ledger = self.lock();
        ledger.waiting.insert(sequence, turn);
        loop {
            let next = ledger.next_to_publish;
            let Some(settled) = ledger.waiting.remove(&next) else {
                break;
            };
            if let Some(turn) = settled {
                ledger.published.push(turn);
            }
            ledger.next_to_publish += 1;
        }
    }

    /// Turnos publicados, en orden de llegada.
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.lock().published.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().published.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }
}
