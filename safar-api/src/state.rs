use std::sync::Arc;

use safar_ticketing::TicketService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TicketService>,
}
