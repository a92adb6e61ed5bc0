// Demo seeder: generate a deterministic mock population
//
// Covers every classification path: new customers, active regulars,
// storage contract holders, at-risk and churned accounts, B2B fleets of
// every size bucket and a few high-value tire purchasers. Seeded from a
// fixed constant so `seed-demo` always produces the same database and
// the same classification output.
//
// Run with: segmentry seed-demo --customers 200

use crate::model::{Booking, Customer, OrderLine};
use crate::store::Store;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

/// Fixed seed so demo runs are reproducible
const DEMO_SEED: u64 = 0x5eed_5e67_3417_21ab;

/// xorshift64 - deterministic, no rand dependency needed for demo data
struct DemoRng(u64);

impl DemoRng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform-ish value in [lo, hi)
    fn range(&mut self, lo: u64, hi: u64) -> u64 {
        lo + self.next() % (hi - lo)
    }

    fn amount(&mut self, lo: u64, hi: u64) -> f64 {
        self.range(lo, hi) as f64
    }
}

/// Seed `count` demo customers with booking histories. Existing rows with
/// the same ids are overwritten, so reseeding is idempotent.
pub fn seed(store: &Store, count: usize, now: DateTime<Utc>) -> Result<usize> {
    let mut rng = DemoRng(DEMO_SEED);

    for i in 0..count {
        let id = format!("demo-{i:05}");
        // Cycle through personas so every classification path is populated
        match i % 10 {
            0 => seed_new_customer(store, &id, now, &mut rng)?,
            1 | 2 => seed_active_regular(store, &id, now, &mut rng)?,
            3 => seed_storage_holder(store, &id, now, &mut rng)?,
            4 => seed_at_risk(store, &id, now, &mut rng)?,
            5 => seed_churned_recent(store, &id, now, &mut rng)?,
            6 => seed_churned_old(store, &id, now, &mut rng)?,
            7 => seed_smb_fleet(store, &id, now, &mut rng)?,
            8 => seed_enterprise_fleet(store, &id, now, &mut rng)?,
            _ => seed_high_value_purchaser(store, &id, now, &mut rng)?,
        }
    }

    tracing::info!("Seeded {count} demo customers");
    Ok(count)
}

fn b2c(id: &str) -> Customer {
    Customer {
        user_group_id: id.to_string(),
        org_id: None,
        is_personal: true,
        fleet_size: None,
        storage_status: false,
    }
}

fn b2b(id: &str, fleet_size: u32) -> Customer {
    Customer {
        user_group_id: id.to_string(),
        org_id: Some(format!("org-{id}")),
        is_personal: false,
        fleet_size: Some(fleet_size),
        storage_status: false,
    }
}

fn booking(id: String, customer: &str, at: DateTime<Utc>, lines: Vec<OrderLine>) -> Booking {
    Booking {
        id,
        user_group_id: customer.to_string(),
        started_at: Some(at),
        booking_date: None,
        completed_at: Some(at + Duration::hours(1)),
        completed: true,
        cancelled: false,
        lines,
    }
}

fn line(id: String, amount: f64, description: &str) -> OrderLine {
    OrderLine {
        id,
        amount,
        currency: "NOK".to_string(),
        is_discount: false,
        description: description.to_string(),
    }
}

/// One wheel-change booking within the last month
fn seed_new_customer(store: &Store, id: &str, now: DateTime<Utc>, rng: &mut DemoRng) -> Result<()> {
    store.upsert_customer(&b2c(id))?;
    let at = now - Duration::days(rng.range(3, 25) as i64);
    store.insert_booking(&booking(
        format!("{id}-b0"),
        id,
        at,
        vec![line(format!("{id}-l0"), rng.amount(800, 1400), "Hjulskift")],
    ))?;
    Ok(())
}

/// Several bookings per season across two categories, latest recent
fn seed_active_regular(store: &Store, id: &str, now: DateTime<Utc>, rng: &mut DemoRng) -> Result<()> {
    store.upsert_customer(&b2c(id))?;
    for n in 0..4i64 {
        let at = now - Duration::days(rng.range(20, 180) as i64 + n * 150);
        let description = if n % 2 == 0 { "Dekkskift" } else { "Utvendig vask" };
        store.insert_booking(&booking(
            format!("{id}-b{n}"),
            id,
            at,
            vec![line(format!("{id}-l{n}"), rng.amount(500, 1500), description)],
        ))?;
    }
    Ok(())
}

/// Tire hotel contract keeps them Active despite stale bookings
fn seed_storage_holder(store: &Store, id: &str, now: DateTime<Utc>, rng: &mut DemoRng) -> Result<()> {
    let mut customer = b2c(id);
    customer.storage_status = true;
    store.upsert_customer(&customer)?;
    let at = now - Duration::days(rng.range(250, 400) as i64);
    store.insert_booking(&booking(
        format!("{id}-b0"),
        id,
        at,
        vec![
            line(format!("{id}-l0"), rng.amount(900, 1300), "Hjulskift"),
            line(format!("{id}-l1"), rng.amount(1500, 2500), "Dekkhotell sesong"),
        ],
    ))?;
    Ok(())
}

/// Last booking roughly eight months ago
fn seed_at_risk(store: &Store, id: &str, now: DateTime<Utc>, rng: &mut DemoRng) -> Result<()> {
    store.upsert_customer(&b2c(id))?;
    for n in 0..3i64 {
        let at = now - Duration::days(rng.range(220, 270) as i64 + n * 180);
        store.insert_booking(&booking(
            format!("{id}-b{n}"),
            id,
            at,
            vec![line(format!("{id}-l{n}"), rng.amount(600, 1200), "Dekkskift")],
        ))?;
    }
    Ok(())
}

/// Churned about a year ago: salvageable dormant
fn seed_churned_recent(store: &Store, id: &str, now: DateTime<Utc>, rng: &mut DemoRng) -> Result<()> {
    store.upsert_customer(&b2c(id))?;
    for n in 0..2i64 {
        let at = now - Duration::days(rng.range(340, 500) as i64 + n * 180);
        store.insert_booking(&booking(
            format!("{id}-b{n}"),
            id,
            at,
            vec![line(format!("{id}-l{n}"), rng.amount(600, 1200), "Hjulskift")],
        ))?;
    }
    Ok(())
}

/// One booking three years back: transient dormant
fn seed_churned_old(store: &Store, id: &str, now: DateTime<Utc>, rng: &mut DemoRng) -> Result<()> {
    store.upsert_customer(&b2c(id))?;
    let at = now - Duration::days(rng.range(1000, 1300) as i64);
    store.insert_booking(&booking(
        format!("{id}-b0"),
        id,
        at,
        vec![line(format!("{id}-l0"), rng.amount(500, 900), "Utvendig vask")],
    ))?;
    Ok(())
}

/// Small B2B fleet with recurring wash bookings
fn seed_smb_fleet(store: &Store, id: &str, now: DateTime<Utc>, rng: &mut DemoRng) -> Result<()> {
    store.upsert_customer(&b2b(id, rng.range(3, 18) as u32))?;
    for n in 0..6i64 {
        let at = now - Duration::days(rng.range(10, 90) as i64 + n * 60);
        store.insert_booking(&booking(
            format!("{id}-b{n}"),
            id,
            at,
            vec![line(format!("{id}-l{n}"), rng.amount(2000, 5000), "Flåtevask")],
        ))?;
    }
    Ok(())
}

/// Enterprise fleet: large recent volume across services
fn seed_enterprise_fleet(store: &Store, id: &str, now: DateTime<Utc>, rng: &mut DemoRng) -> Result<()> {
    store.upsert_customer(&b2b(id, rng.range(50, 120) as u32))?;
    for n in 0..8i64 {
        let at = now - Duration::days(rng.range(5, 60) as i64 + n * 30);
        let description = if n % 3 == 0 { "Dekkskift flåte" } else { "Vask og rens" };
        store.insert_booking(&booking(
            format!("{id}-b{n}"),
            id,
            at,
            vec![line(format!("{id}-l{n}"), rng.amount(8000, 25000), description)],
        ))?;
    }
    Ok(())
}

/// B2C with one premium tire purchase over the high-value threshold
fn seed_high_value_purchaser(
    store: &Store,
    id: &str,
    now: DateTime<Utc>,
    rng: &mut DemoRng,
) -> Result<()> {
    store.upsert_customer(&b2c(id))?;
    let at = now - Duration::days(rng.range(30, 150) as i64);
    store.insert_booking(&booking(
        format!("{id}-b0"),
        id,
        at,
        vec![
            line(format!("{id}-l0"), rng.amount(9000, 16000), "4x Premium vinterdekk"),
            line(format!("{id}-l1"), rng.amount(800, 1200), "Omlegging og balansering"),
        ],
    ))?;
    Ok(())
}
