//! Route pricing. A missing or inactive route prices at zero: "no price
//! change" is a valid state, never an error.

use safar_shared::models::{TransportRoute, TripType};

/// Price for a directional route per trip type. Direction matters; the
/// caller looks the route up with departure and arrival in order.
pub fn route_price(route: Option<&TransportRoute>, trip_type: TripType) -> i64 {
    match route {
        Some(r) if r.is_active => match trip_type {
            TripType::OneWay => r.one_way_price,
            TripType::RoundTrip => r.round_trip_price,
        },
        _ => 0,
    }
}

/// One-way price regardless of the applicant's trip type; no-show
/// compensation is computed against the single missed leg.
pub fn one_way_price(route: Option<&TransportRoute>) -> i64 {
    route_price(route, TripType::OneWay)
}

/// Signed difference a modification carries: new route minus old route.
pub fn price_difference(old_price: i64, new_price: i64) -> i64 {
    new_price - old_price
}
