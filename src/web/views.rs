use std::collections::BTreeMap;

use chrono::NaiveDate;
use leptos::prelude::*;

use crate::admin::{AppointmentRow, DashboardStats};
use crate::calendar::format_time;
use crate::models::Slot;
use crate::session::format_whatsapp;

const STYLE: &str = include_str!("../style.css");

fn render_page(studio: &str, title: &str, body_html: String) -> String {
    let page_title = format!("{title} · {studio}");
    let studio = studio.to_string();
    let title = title.to_string();

    view! {
        <html lang="en">
            <head>
                <meta charset="utf-8" />
                <meta name="viewport" content="width=device-width, initial-scale=1" />
                <title>{page_title}</title>
                <style>{STYLE}</style>
            </head>
            <body>
                <nav>
                    <strong>{studio}</strong>
                    <a href="/">"Dashboard"</a>
                    <a href="/appointments">"Appointments"</a>
                </nav>
                <h1>{title}</h1>
                <div inner_html=body_html />
            </body>
        </html>
    }
    .to_html()
}

pub(super) fn render_dashboard_page(
    studio: &str,
    now: &str,
    stats: &DashboardStats,
    recent: &[AppointmentRow],
    schedule: &BTreeMap<NaiveDate, Vec<Slot>>,
) -> String {
    let stats_html = render_stats(stats);
    let recent_html = render_recent(recent);
    let schedule_html = render_schedule(schedule);
    let now = now.to_string();

    let body = view! {
        <p class="timestamp">"Updated: " {now}</p>
        <section inner_html=stats_html />
        <section>
            <h2>"Recent Activity"</h2>
            <div inner_html=recent_html />
        </section>
        <section>
            <h2>"Open Schedule"</h2>
            <div inner_html=schedule_html />
        </section>
    }
    .to_html();
    render_page(studio, "Dashboard", body)
}

pub(super) fn render_appointments_page(studio: &str, rows: &[AppointmentRow]) -> String {
    let body = render_appointments_table(rows);
    render_page(studio, "Appointments", body)
}

fn render_stats(stats: &DashboardStats) -> String {
    let cards = [
        ("Appointments", stats.total_appointments.to_string()),
        ("Clients", stats.total_clients.to_string()),
        ("Revenue", format!("R$ {:.2}", stats.revenue)),
        ("Completion rate", format!("{}%", stats.completion_rate)),
    ];
    let cards_html: String = cards
        .into_iter()
        .map(|(label, value)| {
            view! {
                <div class="card">
                    <span class="card-value">{value}</span>
                    <span class="card-label">{label}</span>
                </div>
            }
            .to_html()
        })
        .collect();

    view! { <div class="cards" inner_html=cards_html /> }.to_html()
}

fn status_badge(row: &AppointmentRow) -> String {
    let meta = row.status.meta();
    let class = format!("badge {}", meta.css_class);
    view! { <span class=class>{meta.label}</span> }.to_html()
}

fn render_recent(rows: &[AppointmentRow]) -> String {
    if rows.is_empty() {
        return view! { <p class="empty">"No recent activity."</p> }.to_html();
    }

    let items: String = rows
        .iter()
        .map(|r| {
            let who = format!("{} - {}", r.client_name, r.service_name);
            let when = format!("{} {}", r.date.format("%d/%m"), format_time(r.time));
            let badge = status_badge(r);
            view! {
                <li>
                    <span>{who}</span>
                    <span class="when">{when}</span>
                    <span inner_html=badge />
                </li>
            }
            .to_html()
        })
        .collect();

    view! { <ul class="activity" inner_html=items /> }.to_html()
}

fn render_schedule(schedule: &BTreeMap<NaiveDate, Vec<Slot>>) -> String {
    if schedule.is_empty() {
        return view! { <p class="empty">"No open slots."</p> }.to_html();
    }

    schedule
        .iter()
        .map(|(date, slots)| {
            let heading = date.format("%A, %d/%m/%Y").to_string();
            let times: String = slots
                .iter()
                .map(|s| {
                    let t = format_time(s.time);
                    view! { <span class="chip">{t}</span> }.to_html()
                })
                .collect();
            view! {
                <div class="day">
                    <h3>{heading}</h3>
                    <div class="chips" inner_html=times />
                </div>
            }
            .to_html()
        })
        .collect()
}

fn render_appointments_table(rows: &[AppointmentRow]) -> String {
    if rows.is_empty() {
        return view! { <p class="empty">"No appointments yet."</p> }.to_html();
    }

    let rows_html: String = rows
        .iter()
        .map(|r| {
            let date = r.date.format("%d/%m/%Y").to_string();
            let time = format_time(r.time);
            let client = r.client_name.clone();
            let whatsapp = r.client_whatsapp.as_deref().map(format_whatsapp).unwrap_or_default();
            let service = r.service_name.clone();
            let price = r.service_price.map(|p| format!("R$ {p:.2}")).unwrap_or_default();
            let badge = status_badge(r);

            view! {
                <tr>
                    <td>{date}</td>
                    <td>{time}</td>
                    <td>{client}</td>
                    <td>{whatsapp}</td>
                    <td>{service}</td>
                    <td class="price">{price}</td>
                    <td inner_html=badge />
                </tr>
            }
            .to_html()
        })
        .collect();

    view! {
        <table>
            <thead>
                <tr>
                    <th>"Date"</th>
                    <th>"Time"</th>
                    <th>"Client"</th>
                    <th>"WhatsApp"</th>
                    <th>"Service"</th>
                    <th>"Price"</th>
                    <th>"Status"</th>
                </tr>
            </thead>
            <tbody inner_html=rows_html />
        </table>
    }
    .to_html()
}
