//! Roster route handlers.
//!
//! The roster lives in the session under [`ROSTER_KEY`]. Each handler loads
//! it, applies one operation, and saves it back. Losing the session only means
//! starting over: a load failure yields an empty roster and a save failure is
//! logged, never returned.

use axum::{
    Json,
    extract::Path,
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;

use atelier_core::{Person, PersonId, PersonRoster, PersonUpdate};

use crate::error::Result;
use crate::routes::{Success, success};

/// Session key for the in-progress roster.
pub const ROSTER_KEY: &str = "roster";

// =============================================================================
// Session Helpers
// =============================================================================

/// Load the roster, or an empty one if the session has none or it is unreadable.
pub(crate) async fn load_roster(session: &Session) -> PersonRoster {
    match session.get::<PersonRoster>(ROSTER_KEY).await {
        Ok(roster) => roster.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load roster from session, starting over");
            PersonRoster::new()
        }
    }
}

/// Save the roster. Failure is logged; the request still succeeds.
pub(crate) async fn save_roster(session: &Session, roster: &PersonRoster) {
    if let Err(e) = session.insert(ROSTER_KEY, roster).await {
        tracing::error!(error = %e, "Failed to save roster to session");
    }
}

/// Drop the roster from the session.
pub(crate) async fn clear_roster(session: &Session) {
    if let Err(e) = session.remove::<PersonRoster>(ROSTER_KEY).await {
        tracing::error!(error = %e, "Failed to clear roster from session");
    }
}

// =============================================================================
// Views
// =============================================================================

/// Roster as returned to the client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterView {
    pub people: Vec<Person>,
    pub current_index: usize,
    pub current: Option<PersonId>,
    /// The checkout gate.
    pub ready_for_checkout: bool,
    pub incomplete: Vec<PersonId>,
}

impl From<&PersonRoster> for RosterView {
    fn from(roster: &PersonRoster) -> Self {
        Self {
            people: roster.people().to_vec(),
            current_index: roster.current_index(),
            current: roster.current().map(|p| p.id.clone()),
            ready_for_checkout: roster.all_complete(),
            incomplete: roster.incomplete_people(),
        }
    }
}

/// Replace request body.
#[derive(Debug, Deserialize)]
pub struct ReplaceRoster {
    pub people: Vec<Person>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Current roster.
#[instrument(skip_all)]
pub async fn show(session: Session) -> Json<Success<RosterView>> {
    let roster = load_roster(&session).await;
    success(RosterView::from(&roster))
}

/// Replace every person and reset the cursor.
#[instrument(skip_all, fields(people = body.people.len()))]
pub async fn replace(session: Session, Json(body): Json<ReplaceRoster>) -> Result<Json<Success<RosterView>>> {
    let mut roster = load_roster(&session).await;
    roster.replace(body.people)?;
    save_roster(&session, &roster).await;
    Ok(success(RosterView::from(&roster)))
}

/// Start over with an empty roster.
#[instrument(skip_all)]
pub async fn reset(session: Session) -> Json<Success<RosterView>> {
    clear_roster(&session).await;
    success(RosterView::from(&PersonRoster::new()))
}

/// Merge a partial update into one person.
#[instrument(skip_all, fields(person_id = %person_id))]
pub async fn update_person(
    session: Session,
    Path(person_id): Path<PersonId>,
    Json(update): Json<PersonUpdate>,
) -> Result<Json<Success<RosterView>>> {
    let mut roster = load_roster(&session).await;
    roster.update(&person_id, update)?;
    save_roster(&session, &roster).await;
    Ok(success(RosterView::from(&roster)))
}

/// Move the cursor forward.
#[instrument(skip_all)]
pub async fn advance(session: Session) -> Json<Success<RosterView>> {
    let mut roster = load_roster(&session).await;
    roster.advance();
    save_roster(&session, &roster).await;
    success(RosterView::from(&roster))
}

/// Move the cursor back.
#[instrument(skip_all)]
pub async fn retreat(session: Session) -> Json<Success<RosterView>> {
    let mut roster = load_roster(&session).await;
    roster.retreat();
    save_roster(&session, &roster).await;
    success(RosterView::from(&roster))
}
