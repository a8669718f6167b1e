//! UI panels for the application
//!
//! Action pad, basemap selector, count alert and the feature detail panel,
//! all overlaid on the map.

use crate::app::state::{AppState, TilesProvider, TreeLayer};
use egui::{Color32, RichText, Ui};

/// Render the action pad (top-left window over the map)
pub fn action_pad(ctx: &egui::Context, state: &mut AppState) {
    egui::Window::new("Actions")
        .anchor(egui::Align2::LEFT_TOP, egui::vec2(10.0, 10.0))
        .resizable(false)
        .collapsible(true)
        .show(ctx, |ui| {
            ui.label("Click the map to add a walking-time area.");
            ui.add_space(4.0);

            tree_layer_button(ui, ctx, state);

            if ui.button("🔍 Find common area").clicked() {
                state.find_common_area(ctx);
            }

            let clustering = state.services.session.is_clustering();
            let label = if clustering {
                "Remove clustering"
            } else {
                "Cluster"
            };
            if ui.button(label).clicked() {
                state.set_clustering(!clustering);
            }

            if ui.button("🗑 Reset").clicked() {
                state.reset(ctx);
            }

            if state.is_busy() {
                ui.horizontal(|ui| {
                    ui.spinner();
                    ui.label("Working...");
                });
            }

            ui.separator();
            basemap_selector(ui, state);
        });
}

fn tree_layer_button(ui: &mut Ui, ctx: &egui::Context, state: &mut AppState) {
    // Use try_read for non-blocking UI polling.
    let layer = state.tree_layer.try_read().map(|l| l.clone()).ok();
    match layer {
        Some(TreeLayer::NotAdded) => {
            if ui.button("🌳 Add tree layer").clicked() {
                state.add_tree_layer(ctx);
            }
        }
        Some(TreeLayer::Failed(error)) => {
            if ui.button("🌳 Add tree layer").clicked() {
                state.add_tree_layer(ctx);
            }
            ui.label(
                RichText::new(format!("⚠ {}", error))
                    .small()
                    .color(Color32::RED),
            );
        }
        Some(TreeLayer::Ready { index, .. }) => {
            ui.label(format!("🌳 {} trees loaded", index.len()));
        }
        Some(TreeLayer::Loading) | None => {
            ui.add_enabled(false, egui::Button::new("🌳 Loading trees..."));
        }
    }
}

fn basemap_selector(ui: &mut Ui, state: &mut AppState) {
    ui.horizontal(|ui| {
        ui.label("Basemap:");
        egui::ComboBox::from_id_salt("tiles_provider")
            .selected_text(state.ui_settings.tiles_provider.name())
            .show_ui(ui, |ui| {
                for provider in TilesProvider::all() {
                    ui.selectable_value(
                        &mut state.ui_settings.tiles_provider,
                        *provider,
                        provider.name(),
                    );
                }
            });
    });
}

/// Count alert at the top of the map, closable
pub fn alert_banner(ctx: &egui::Context, state: &AppState) {
    let Ok(alert) = state.services.session.alert().try_read() else {
        return;
    };
    if !alert.open {
        return;
    }
    let title = alert.title.clone();
    drop(alert);

    egui::Area::new(egui::Id::new("count_alert"))
        .anchor(egui::Align2::CENTER_TOP, egui::vec2(0.0, 10.0))
        .show(ctx, |ui| {
            egui::Frame::popup(ui.style())
                .fill(Color32::from_rgb(230, 245, 236))
                .show(ui, |ui| {
                    ui.horizontal(|ui| {
                        ui.label(
                            RichText::new(title)
                                .strong()
                                .color(Color32::from_rgb(20, 90, 50)),
                        );
                        if ui.small_button("✕").clicked()
                            && let Ok(mut alert) = state.services.session.alert().try_write()
                        {
                            alert.open = false;
                        }
                    });
                });
        });
}

/// Detail of the hovered feature, rendered through its layer's template
pub fn detail_panel(ctx: &egui::Context, state: &AppState) {
    egui::Window::new("Details")
        .anchor(egui::Align2::RIGHT_TOP, egui::vec2(-10.0, 10.0))
        .resizable(false)
        .default_width(260.0)
        .show(ctx, |ui| {
            // Use try_lock for non-blocking UI polling.
            let detail = state
                .services
                .session
                .highlight()
                .try_lock()
                .ok()
                .and_then(|h| h.detail().cloned());

            let Some(detail) = detail else {
                ui.label(RichText::new("Mouse over features to show details...").italics());
                return;
            };

            ui.label(RichText::new(detail.title()).strong());
            ui.add_space(4.0);
            egui::Grid::new("detail_grid")
                .num_columns(2)
                .striped(true)
                .show(ui, |ui| {
                    for (label, value) in detail.rows() {
                        ui.label(label);
                        ui.label(value);
                        ui.end_row();
                    }
                });
        });
}

/// Tile attribution at the bottom of the map
pub fn attribution(ui: &Ui, state: &AppState) {
    let painter = ui.painter();
    let screen_rect = ui.max_rect();
    painter.text(
        screen_rect.center_bottom() + egui::vec2(0.0, -5.0),
        egui::Align2::CENTER_BOTTOM,
        state.ui_settings.tiles_provider.attribution(),
        egui::FontId::proportional(10.0),
        egui::Color32::from_black_alpha(180),
    );
}
