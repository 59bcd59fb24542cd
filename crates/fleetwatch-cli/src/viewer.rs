use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use fleetwatch_core::{
    Alert, AlertFeed, Banner, Feed, FeedPayload, FixState, MapPresenter, Marker, Poller, Position, Severity, Snapshot,
    TrackingConfig, ViewPhase, POLL_INTERVAL,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::symbols;
use ratatui::text::{Line, Span};
use ratatui::widgets::canvas::{Canvas, Map, MapResolution};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph};
use ratatui::Terminal;
use tokio::sync::mpsc;
use tracing::debug;

use crate::render::{format_coordinates, format_speed, format_time, fix_label};

const CAMERA_EASING: f64 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Vehicles,
    Alerts,
}

struct ViewerState {
    presenter: MapPresenter,
    positions: Arc<Snapshot<Position>>,
    alerts: Arc<Snapshot<Alert>>,
    focus: Focus,
    vehicle_cursor: ListState,
    alert_cursor: ListState,
    title: String,
}

impl ViewerState {
    fn new(presenter: MapPresenter, title: String) -> Self {
        Self {
            presenter,
            positions: Arc::new(Snapshot::empty()),
            alerts: Arc::new(Snapshot::empty()),
            focus: Focus::Vehicles,
            vehicle_cursor: ListState::default(),
            alert_cursor: ListState::default(),
            title,
        }
    }

    fn on_positions(&mut self, snapshot: Arc<Snapshot<Position>>) {
        let diff = self.presenter.apply(&snapshot);
        if !diff.is_empty() {
            debug!(added = ?diff.added, moved = ?diff.moved, removed = ?diff.removed, "map refreshed");
        }
        self.positions = snapshot;
        clamp(&mut self.vehicle_cursor, self.presenter.markers().len());
    }

    fn on_alerts(&mut self, snapshot: Arc<Snapshot<Alert>>) {
        self.alerts = snapshot;
        clamp(&mut self.alert_cursor, self.alerts.items.len());
    }

    fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            Focus::Vehicles => Focus::Alerts,
            Focus::Alerts => Focus::Vehicles,
        };
    }

    fn move_cursor(&mut self, delta: isize) {
        let (cursor, len) = match self.focus {
            Focus::Vehicles => (&mut self.vehicle_cursor, self.presenter.markers().len()),
            Focus::Alerts => (&mut self.alert_cursor, self.alerts.items.len()),
        };
        if len == 0 {
            cursor.select(None);
            return;
        }
        let current = cursor.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, len as isize - 1);
        cursor.select(Some(next as usize));
    }

    /// Selects the vehicle under the cursor, or the vehicle an alert refers to.
    fn activate(&mut self) -> bool {
        let entity = match self.focus {
            Focus::Vehicles => self
                .vehicle_cursor
                .selected()
                .and_then(|idx| self.presenter.markers().get(idx))
                .map(|marker| marker.entity.clone()),
            Focus::Alerts => self
                .alert_cursor
                .selected()
                .and_then(|idx| self.alerts.items.get(idx))
                .map(|alert| alert.entity_id.clone()),
        };
        let Some(entity) = entity else {
            return false;
        };

        let selected = self.presenter.select(&entity);
        if selected {
            let row = self.presenter.markers().iter().position(|m| m.entity == entity);
            self.vehicle_cursor.select(row);
        }
        selected
    }
}

fn clamp(cursor: &mut ListState, len: usize) {
    cursor.select(match (cursor.selected(), len) {
        (_, 0) => None,
        (None, _) => Some(0),
        (Some(idx), len) => Some(idx.min(len - 1)),
    });
}

pub async fn run_viewer<F>(feed: F, alert_feed: AlertFeed, config: &TrackingConfig) -> Result<()>
where
    F: Feed,
    F::Payload: FeedPayload<Item = Position>,
{
    let title = feed.describe();
    let mut positions = Poller::start(feed, POLL_INTERVAL, config.stale_after);
    let mut alerts = Poller::start(alert_feed, POLL_INTERVAL, config.stale_after);

    let (position_tx, mut position_rx) = mpsc::unbounded_channel();
    let (alert_tx, mut alert_rx) = mpsc::unbounded_channel();
    let _position_subscription = positions.subscribe(move |snapshot| {
        let _ = position_tx.send(snapshot);
    });
    let _alert_subscription = alerts.subscribe(move |snapshot| {
        let _ = alert_tx.send(snapshot);
    });

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut state = ViewerState::new(MapPresenter::new(config.map), title);

    let run_result = async {
        loop {
            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        match key.code {
                            KeyCode::Char('q') | KeyCode::Esc => break,
                            KeyCode::Tab => state.toggle_focus(),
                            KeyCode::Up | KeyCode::Char('k') => state.move_cursor(-1),
                            KeyCode::Down | KeyCode::Char('j') => state.move_cursor(1),
                            KeyCode::Enter => {
                                state.activate();
                            }
                            KeyCode::Char('c') => state.presenter.clear_selection(),
                            _ => {}
                        }
                    }
                }
            }

            while let Ok(snapshot) = position_rx.try_recv() {
                state.on_positions(snapshot);
            }
            while let Ok(snapshot) = alert_rx.try_recv() {
                state.on_alerts(snapshot);
            }
            state.presenter.camera_mut().advance(CAMERA_EASING);

            terminal.draw(|frame| draw_ui(frame.size(), frame, &mut state))?;
            tokio::task::yield_now().await;
        }

        Ok::<(), anyhow::Error>(())
    }
    .await;

    positions.stop();
    alerts.stop();

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    run_result
}

fn draw_ui(area: Rect, frame: &mut ratatui::Frame<'_>, state: &mut ViewerState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(0)])
        .split(area);

    frame.render_widget(render_header(state), rows[0]);

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(rows[1]);

    render_map(frame, cols[0], state);

    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(cols[1]);

    render_vehicles(frame, side[0], state);
    render_alerts(frame, side[1], state);
}

fn header_status(state: &ViewerState) -> (String, Color) {
    match (state.presenter.phase(), state.presenter.banner()) {
        (ViewPhase::Loading, Banner::Error(message)) => (format!("Loading... ! {message}"), Color::Red),
        (ViewPhase::Loading, _) => ("Loading vehicle positions...".to_string(), Color::Gray),
        (ViewPhase::Ready, Banner::Error(message)) => (format!("! {message}"), Color::Red),
        (ViewPhase::Ready, Banner::Unavailable(reason)) => (reason.clone(), Color::Yellow),
        (ViewPhase::Ready, Banner::None) => (
            format!(
                "{} vehicle(s)  updated {}",
                state.presenter.markers().len(),
                format_time(state.positions.fetched_at)
            ),
            Color::Green,
        ),
    }
}

fn render_header(state: &ViewerState) -> Paragraph<'static> {
    let (status, color) = header_status(state);

    let lines = vec![
        Line::from(vec![
            Span::styled("Fleetwatch  ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
            Span::raw(state.title.clone()),
            Span::raw("  "),
            Span::styled(status, Style::default().fg(color)),
        ]),
        Line::from("q quit  tab switch list  up/down move  enter focus  c clear"),
    ];

    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Status"))
}

fn render_map(frame: &mut ratatui::Frame<'_>, area: Rect, state: &ViewerState) {
    let camera = state.presenter.camera();
    let center = camera.center();
    let (lon_span, lat_span) = camera.span();
    let selected = state.presenter.selection().cloned();

    let pins: Vec<(f64, f64, String, Style)> = state
        .presenter
        .markers()
        .iter()
        .filter_map(|marker| {
            let at = marker.plotted_at()?;
            let style = if selected.as_ref() == Some(&marker.entity) {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(fix_color(marker.fix))
            };
            Some((at.longitude, at.latitude, format!("● {}", marker.label), style))
        })
        .collect();

    let canvas = Canvas::default()
        .block(Block::default().borders(Borders::ALL).title(format!(
            "Map  {}  zoom {:.1}",
            format_coordinates(center),
            camera.zoom()
        )))
        .marker(symbols::Marker::Braille)
        .x_bounds([center.longitude - lon_span, center.longitude + lon_span])
        .y_bounds([center.latitude - lat_span, center.latitude + lat_span])
        .paint(move |ctx| {
            ctx.draw(&Map {
                color: Color::DarkGray,
                resolution: MapResolution::High,
            });
            ctx.layer();
            for (x, y, label, style) in &pins {
                ctx.print(*x, *y, Span::styled(label.clone(), *style));
            }
        });
    frame.render_widget(canvas, area);

    if let Some(marker) = state.presenter.detail() {
        render_detail(frame, area, marker, &state.alerts);
    }
}

fn render_detail(frame: &mut ratatui::Frame<'_>, map: Rect, marker: &Marker, alerts: &Snapshot<Alert>) {
    let width = map.width.min(44);
    let height = map.height.min(8);
    let area = Rect {
        x: map.x + map.width.saturating_sub(width + 1),
        y: map.y + 1,
        width,
        height,
    };

    let location = marker
        .plotted_at()
        .map(format_coordinates)
        .unwrap_or_else(|| "location unavailable".to_string());
    let lines = vec![
        Line::from(Span::styled(marker.label.clone(), Style::default().add_modifier(Modifier::BOLD))),
        Line::from(location),
        Line::from(format!("speed  {}", format_speed(marker.speed_kmh))),
        Line::from(format!("fix    {}", fix_label(marker.fix))),
        Line::from(format!("seen   {}", format_time(marker.observed_at))),
        Line::from(format!("alerts {}", alerts.for_entity(&marker.entity).count())),
    ];

    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Vehicle")),
        area,
    );
}

fn render_vehicles(frame: &mut ratatui::Frame<'_>, area: Rect, state: &mut ViewerState) {
    let selected = state.presenter.selection();
    let items: Vec<ListItem> = state
        .presenter
        .markers()
        .iter()
        .map(|marker| {
            let mut style = Style::default().fg(fix_color(marker.fix));
            if selected == Some(&marker.entity) {
                style = style.add_modifier(Modifier::BOLD);
            }
            let line = match marker.plotted_at() {
                Some(at) => format!("{:<12} {}", marker.label, format_coordinates(at)),
                None => format!("{:<12} location unavailable", marker.label),
            };
            ListItem::new(line).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(panel("Vehicles", state.focus == Focus::Vehicles))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("> ");
    frame.render_stateful_widget(list, area, &mut state.vehicle_cursor);
}

fn render_alerts(frame: &mut ratatui::Frame<'_>, area: Rect, state: &mut ViewerState) {
    let items: Vec<ListItem> = state
        .alerts
        .items
        .iter()
        .map(|alert| {
            let style = alert.kind.descriptor();
            ListItem::new(format!(
                "{:<2} {:<10} {:<12} {}",
                style.glyph,
                style.title,
                alert.label,
                alert.message
            ))
            .style(Style::default().fg(severity_color(style.severity)))
        })
        .collect();

    let title = match &state.alerts.error {
        Some(error) => format!("Alerts  ! {error}"),
        None => "Alerts".to_string(),
    };
    let list = List::new(items)
        .block(panel(&title, state.focus == Focus::Alerts))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("> ");
    frame.render_stateful_widget(list, area, &mut state.alert_cursor);
}

fn panel(title: &str, focused: bool) -> Block<'static> {
    let border = if focused { Color::Cyan } else { Color::Gray };
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .title(title.to_string())
}

fn fix_color(fix: FixState) -> Color {
    match fix {
        FixState::Live => Color::Green,
        FixState::Stale => Color::Yellow,
        FixState::Unavailable => Color::DarkGray,
    }
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Critical => Color::Red,
        Severity::Warning => Color::Yellow,
        Severity::Info => Color::Blue,
    }
}
