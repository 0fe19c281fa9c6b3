//! One-shot CLI commands (print to stdout)

use anyhow::{bail, Context, Result};

use crate::api::PointQuery;
use crate::auth::{format_expiry, Credentials};
use crate::config::CredentialStore;
use crate::models::{point_field, PointId};
use crate::service::Service;

pub fn configure(service: &Service, credentials: &Credentials) -> Result<()> {
    credentials.validate()?;
    service.store_credentials(credentials)?;
    println!("Credentials saved. Run 'isolar-cli login' to sign in.");
    Ok(())
}

pub async fn login(service: &Service) -> Result<()> {
    let credentials = service
        .auth()
        .tokens()
        .store()
        .load()?
        .credentials();
    if credentials.validate().is_err() {
        bail!("No credentials configured. Run 'isolar-cli configure' first.");
    }

    let state = service
        .auth()
        .authenticate(&credentials)
        .await
        .context("Authentication failed")?;
    println!("Logged in.");
    println!("  token expires: {}", format_expiry(state.token_expiry));
    Ok(())
}

pub async fn logout(service: &Service) -> Result<()> {
    service.logout().await?;
    println!("Logged out. Credentials were kept.");
    Ok(())
}

pub fn status(service: &Service) -> Result<()> {
    service.auth().start()?;
    let status = service.auth().status()?;

    match &status.message {
        Some(msg) => println!("State:       {} ({})", status.state, msg),
        None => println!("State:       {}", status.state),
    }
    println!(
        "Credentials: {}",
        if status.has_credentials { "configured" } else { "missing" }
    );
    match status.token_expiry {
        Some(expiry) if status.token_valid => {
            println!("Token:       valid");
            println!("  expires_at: {}", format_expiry(expiry));
        }
        Some(expiry) => {
            println!("Token:       expired");
            println!("  expired_at: {}", format_expiry(expiry));
        }
        None => println!("Token:       none"),
    }
    println!(
        "Plant:       {}",
        status.selected_plant_id.as_deref().unwrap_or("none")
    );
    Ok(())
}

pub async fn refresh(service: &Service) -> Result<()> {
    let state = service.auth().refresh().await?;
    println!("Token refreshed.");
    println!("  expires_at: {}", format_expiry(state.token_expiry));
    Ok(())
}

pub async fn plants(service: &Service, refresh: bool) -> Result<()> {
    let plants = service.plant_list(refresh).await?;
    let selected = service.auth().tokens().store().load()?.selected_plant_id;

    println!("\nPlants:");
    println!("{:-<78}", "");
    if plants.is_empty() {
        println!("  (no plants found)");
        return Ok(());
    }

    for plant in &plants {
        let marker = if selected.as_deref() == Some(plant.ps_id.to_string().as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {:<12} {:<24} {:<20} {:<7} {}",
            marker,
            plant.ps_id,
            plant.ps_name,
            plant.type_label(),
            plant.fault_label(),
            if plant.is_online() { "online" } else { "offline" },
        );
        if let Some(location) = plant.ps_location.as_deref().filter(|l| !l.is_empty()) {
            println!("  {:<12} {} (installed {})", "", location, plant.install_day());
        }
    }
    Ok(())
}

pub async fn devices(service: &Service, ps_id: u64) -> Result<()> {
    let devices = service.device_list(ps_id).await?;

    println!("\nDevices of plant {}:", ps_id);
    println!("{:-<78}", "");
    if devices.is_empty() {
        println!("  (no devices found)");
        return Ok(());
    }

    for device in &devices {
        println!(
            "  {:<22} {:<24} {:<16} {:<7} {}",
            device.ps_key,
            device.device_name,
            device.kind_label(),
            device.fault_label(),
            device.device_sn.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

pub async fn points(
    service: &Service,
    device_type: i64,
    ps_key: String,
    point_ids: Vec<PointId>,
) -> Result<()> {
    if point_ids.is_empty() {
        bail!("At least one point id is required");
    }
    let query = PointQuery {
        device_type,
        ps_key,
        point_ids,
    };
    let rows = service.device_points(&query).await?;

    if rows.is_empty() {
        println!("(no data)");
        return Ok(());
    }
    for row in &rows {
        println!(
            "{} @ {}",
            row.ps_key,
            row.device_time.as_deref().unwrap_or("unknown time")
        );
        for id in &query.point_ids {
            match row.point(*id) {
                Some(value) => println!("  {:<8} {}", point_field(*id), value.0),
                None => println!("  {:<8} -", point_field(*id)),
            }
        }
    }
    Ok(())
}

pub async fn select(service: &Service, ps_id: &str) -> Result<()> {
    let badge = service.select_plant(ps_id).await?;
    println!("Selected plant {}.", ps_id.trim());
    if let Some(text) = badge {
        println!("  battery: {}", text);
    }
    Ok(())
}

pub async fn badge(service: &Service) -> Result<()> {
    match service.badge().tick().await {
        Some(text) => println!("{}", text),
        None => println!("(no badge)"),
    }
    Ok(())
}
