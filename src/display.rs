use crate::error::{DriveError, DriveResult};
use crate::machine::FrameBufferView;
use crate::telemetry::TelemetrySampler;
use std::io;
use tui::backend::CrosstermBackend;
use tui::buffer::Buffer;
use tui::layout::{Constraint, Direction, Layout, Rect};
use tui::style::{Color, Style};
use tui::text::Spans;
use tui::widgets::{Block, Borders, Paragraph, Widget};
use tui::Terminal;

/// red, green, blue, alpha
pub type Rgba = [u8; 4];

pub const DEFAULT_ON_COLOR: Rgba = [255, 255, 255, 255];
pub const DEFAULT_OFF_COLOR: Rgba = [0, 0, 0, 255];

const BYTES_PER_PIXEL: usize = 4;

/// Display is where a finished surface goes once per tick. It should
/// abstract the implementation details, so a variety of kinds of screen would
/// work.
pub trait Display {
    /// show the surface, in one go; `telemetry` is there for displays that
    /// have room for a debug panel
    fn present(
        &mut self,
        surface: &PixelSurface,
        telemetry: Option<&TelemetrySampler>,
    ) -> Result<(), io::Error>;
}

// width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution(pub usize, pub usize);

impl Resolution {
    pub fn pixel_count(&self) -> usize {
        self.0 * self.1
    }

    pub fn byte_count(&self) -> usize {
        self.pixel_count() * BYTES_PER_PIXEL
    }
}

/// host-side RGBA pixels, allocated once per session
#[derive(Debug, Clone)]
pub struct PixelSurface {
    resolution: Resolution,
    rgba: Box<[u8]>,
}

impl PixelSurface {
    pub fn new(resolution: Resolution) -> Self {
        PixelSurface {
            resolution,
            rgba: vec![0u8; resolution.byte_count()].into_boxed_slice(),
        }
    }

    /// sized to match a framebuffer
    pub fn for_view(view: &FrameBufferView<'_>) -> Self {
        Self::new(Resolution(view.width(), view.height()))
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn bytes(&self) -> &[u8] {
        &self.rgba
    }

    /// colour of the pixel at x, y
    pub fn pixel(&self, x: usize, y: usize) -> Rgba {
        let i = (y * self.resolution.0 + x) * BYTES_PER_PIXEL;
        let mut px = [0u8; BYTES_PER_PIXEL];
        px.copy_from_slice(&self.rgba[i..i + BYTES_PER_PIXEL]);
        px
    }
}

/// Expands the machine's one-byte-per-cell display into a `PixelSurface`
/// and hands it to a `Display`.
#[derive(Debug, Clone, Copy)]
pub struct PresentationBridge {
    on: Rgba,
    off: Rgba,
}

impl PresentationBridge {
    pub fn new(on: Rgba, off: Rgba) -> Self {
        PresentationBridge { on, off }
    }

    /// write every cell into the surface; no allocation
    pub fn rasterize(
        &self,
        view: &FrameBufferView<'_>,
        surface: &mut PixelSurface,
    ) -> DriveResult<()> {
        // the surface was sized from this session's framebuffer; a different
        // size means the view is not from the machine we think it is
        if view.cell_count() != surface.resolution.pixel_count() {
            return Err(DriveError::ResourceStale("framebuffer size changed"));
        }
        for (cell, px) in view
            .cells()
            .iter()
            .zip(surface.rgba.chunks_exact_mut(BYTES_PER_PIXEL))
        {
            px.copy_from_slice(if *cell != 0 { &self.on } else { &self.off });
        }
        Ok(())
    }

    /// rasterize, then a single transfer to the display
    pub fn present(
        &self,
        view: &FrameBufferView<'_>,
        surface: &mut PixelSurface,
        display: &mut dyn Display,
        telemetry: Option<&TelemetrySampler>,
    ) -> DriveResult<()> {
        self.rasterize(view, surface)?;
        display.present(surface, telemetry)?;
        Ok(())
    }
}

impl Default for PresentationBridge {
    fn default() -> Self {
        PresentationBridge::new(DEFAULT_ON_COLOR, DEFAULT_OFF_COLOR)
    }
}

fn term_colour(px: Rgba) -> Color {
    Color::Rgb(px[0], px[1], px[2])
}

/// draws two pixel rows per terminal row using upper half blocks: the
/// foreground is the top pixel, the background the bottom one
struct SurfaceWidget<'a> {
    surface: &'a PixelSurface,
}

impl Widget for SurfaceWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let Resolution(w, h) = self.surface.resolution();
        let cols = w.min(area.width as usize);
        let rows = h.div_ceil(2).min(area.height as usize);
        for row in 0..rows {
            for x in 0..cols {
                let top = self.surface.pixel(x, row * 2);
                let bottom = if row * 2 + 1 < h {
                    self.surface.pixel(x, row * 2 + 1)
                } else {
                    top
                };
                buf.get_mut(area.x + x as u16, area.y + row as u16)
                    .set_symbol("▀")
                    .set_fg(term_colour(top))
                    .set_bg(term_colour(bottom));
            }
        }
    }
}

fn telemetry_lines(t: &TelemetrySampler) -> Vec<Spans<'static>> {
    let mut lines = Vec::new();
    if let Some(s) = t.snapshot() {
        for (i, v) in s.v.chunks(2).enumerate() {
            lines.push(Spans::from(format!(
                "V{:X} {:02X}  V{:X} {:02X}",
                i * 2,
                v[0],
                i * 2 + 1,
                v[1]
            )));
        }
        lines.push(Spans::from(format!("I  {:04X}", s.i)));
        lines.push(Spans::from(format!("PC {:04X}", s.program_counter)));
        lines.push(Spans::from(format!("SP {:04X}", s.stack_pointer)));
        lines.push(Spans::from(format!("DT {}  ST {}", s.delay_timer, s.sound_timer)));
    }
    lines.push(Spans::from(""));
    lines.extend(t.history().iter().map(|op| Spans::from(format!("{op:04X}"))));
    lines
}

const TELEMETRY_PANEL_WIDTH: u16 = 18;

/// monochrome display in a terminal, rendered using TUI and crossterm
pub struct MonoTermDisplay {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl MonoTermDisplay {
    pub fn new() -> Result<MonoTermDisplay, io::Error> {
        let backend = CrosstermBackend::new(io::stdout());
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;
        terminal.hide_cursor()?;
        Ok(MonoTermDisplay { terminal })
    }
}

impl Drop for MonoTermDisplay {
    fn drop(&mut self) {
        let _ = self.terminal.show_cursor();
    }
}

impl Display for MonoTermDisplay {
    fn present(
        &mut self,
        surface: &PixelSurface,
        telemetry: Option<&TelemetrySampler>,
    ) -> Result<(), io::Error> {
        let Resolution(w, h) = surface.resolution();
        // +2 for the border
        let screen_w = w as u16 + 2;
        let screen_h = h.div_ceil(2) as u16 + 2;

        self.terminal.draw(|f| {
            let area = f.size();
            let chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints(
                    [
                        Constraint::Length(screen_w),
                        Constraint::Length(TELEMETRY_PANEL_WIDTH),
                        Constraint::Min(0),
                    ]
                    .as_ref(),
                )
                .split(area);
            let screen = Rect {
                height: screen_h.min(chunks[0].height),
                ..chunks[0]
            };

            let block = Block::default()
                .title("CHIP-8")
                .borders(Borders::ALL)
                .style(Style::default().bg(Color::Black));
            let inner = block.inner(screen);
            f.render_widget(block, screen);
            f.render_widget(SurfaceWidget { surface }, inner);

            if let Some(t) = telemetry {
                let panel = Paragraph::new(telemetry_lines(t))
                    .block(Block::default().title("regs").borders(Borders::ALL));
                f.render_widget(panel, chunks[1]);
            }
        })?;
        Ok(())
    }
}

/// useful for testing non-display routines; keeps a copy of the last frame
pub struct DummyDisplay {
    pub frames: usize,
    pub last: Vec<u8>,
}

impl DummyDisplay {
    pub fn new() -> Self {
        DummyDisplay {
            frames: 0,
            last: Vec::new(),
        }
    }
}

impl Default for DummyDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for DummyDisplay {
    fn present(
        &mut self,
        surface: &PixelSurface,
        _telemetry: Option<&TelemetrySampler>,
    ) -> Result<(), io::Error> {
        self.frames += 1;
        self.last.clear();
        self.last.extend_from_slice(surface.bytes());
        Ok(())
    }
}
