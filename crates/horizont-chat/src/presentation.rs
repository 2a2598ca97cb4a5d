//! Client proposal data assembled from a chat transcript.

use chrono::Local;
use serde::Serialize;

use horizont_core::error::HorizontError;
use horizont_core::types::{ChartSpec, ChatId, Role};
use horizont_storage::ChatStore;

const PRESENTATION_TITLE: &str = "Proposta Horizont Investimentos";

/// Everything the proposal view renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Presentation {
    pub title: String,
    pub client: String,
    /// Generation date, `dd/mm/yyyy`.
    pub date: String,
    /// Charts stored with the chat's messages, oldest first.
    pub charts: Vec<ChartSpec>,
    /// Assistant replies that quote monetary values.
    pub calculations: Vec<String>,
}

/// Build proposal data for `client_name` from the chat's stored messages.
pub fn build_presentation(
    store: &ChatStore,
    chat_id: ChatId,
    client_name: &str,
) -> Result<Presentation, HorizontError> {
    if store.get(chat_id)?.is_none() {
        return Err(HorizontError::ChatNotFound(chat_id));
    }

    let mut charts = Vec::new();
    let mut calculations = Vec::new();
    for message in store.list_messages(chat_id)? {
        if let Some(chart) = message.chart {
            charts.push(chart);
        }
        if message.role == Role::Assistant && message.content.contains("R$") {
            calculations.push(message.content);
        }
    }

    let client = match client_name.trim() {
        "" => "Cliente".to_string(),
        name => name.to_string(),
    };

    Ok(Presentation {
        title: PRESENTATION_TITLE.to_string(),
        client,
        date: Local::now().format("%d/%m/%Y").to_string(),
        charts,
        calculations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use horizont_core::types::{NewMessage, QuotedRate};
    use horizont_storage::Database;

    fn store() -> ChatStore {
        ChatStore::new(Arc::new(Database::in_memory().unwrap()))
    }

    #[test]
    fn test_presentation_collects_charts_and_calculations() {
        let store = store();
        let id = store.create("carlos", "Cliente Silva").unwrap();
        let chart = ChartSpec::single("Horizont Trend", 200_000.0, 3, QuotedRate::Yearly(19.37));

        store
            .append_message(id, Role::User, NewMessage::text("Cliente tem R$ 200.000,00"))
            .unwrap();
        store
            .append_message(
                id,
                Role::Assistant,
                NewMessage {
                    content: "Em 3 anos: R$ 340.126,12".to_string(),
                    chart: Some(chart.clone()),
                    attachments: vec![],
                },
            )
            .unwrap();
        store
            .append_message(id, Role::Assistant, NewMessage::text("Boa situação!"))
            .unwrap();

        let presentation = build_presentation(&store, id, "Sr. Silva").unwrap();
        assert_eq!(presentation.title, "Proposta Horizont Investimentos");
        assert_eq!(presentation.client, "Sr. Silva");
        assert_eq!(presentation.charts, vec![chart]);
        assert_eq!(presentation.calculations, vec!["Em 3 anos: R$ 340.126,12"]);
        assert_eq!(presentation.date.len(), 10);
        assert_eq!(&presentation.date[2..3], "/");
    }

    #[test]
    fn test_blank_client_name_defaults() {
        let store = store();
        let id = store.create("ana", "t").unwrap();
        let presentation = build_presentation(&store, id, "  ").unwrap();
        assert_eq!(presentation.client, "Cliente");
        assert!(presentation.charts.is_empty());
        assert!(presentation.calculations.is_empty());
    }

    #[test]
    fn test_unknown_chat_is_not_found() {
        let err = build_presentation(&store(), ChatId::new(), "x").unwrap_err();
        assert!(matches!(err, HorizontError::ChatNotFound(_)));
    }
}
