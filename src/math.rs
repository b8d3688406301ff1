#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Vec2<T> {
    pub x: T,
    pub y: T,
}

pub type Vec2f = Vec2<f64>;
pub type Vec2i = Vec2<i64>;

pub fn vec2f(x: f64, y: f64) -> Vec2f {
    Vec2 { x, y }
}

pub fn vec2i(x: i64, y: i64) -> Vec2i {
    Vec2 { x, y }
}

impl<T> From<(T, T)> for Vec2<T> {
    fn from(value: (T, T)) -> Self {
        Vec2 {
            x: value.0,
            y: value.1,
        }
    }
}

impl From<Vec2i> for Vec2f {
    fn from(value: Vec2i) -> Self {
        Vec2 {
            x: value.x as f64,
            y: value.y as f64,
        }
    }
}

impl<T: std::ops::Sub<Output = T> + std::marker::Copy> std::ops::Sub for Vec2<T> {
    type Output = Self;

    fn sub(self, rhs: Vec2<T>) -> Self::Output {
        Vec2 {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl<T: std::ops::Add<Output = T>> std::ops::Add for Vec2<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Vec2 {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl<T: std::ops::Mul<Output = T> + std::marker::Copy> std::ops::Mul<T> for Vec2<T> {
    type Output = Self;

    fn mul(self, rhs: T) -> Self::Output {
        Vec2 {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

impl<T: std::ops::Div<Output = T> + std::marker::Copy> std::ops::Div<T> for Vec2<T> {
    type Output = Self;

    fn div(self, rhs: T) -> Self::Output {
        Vec2 {
            x: self.x / rhs,
            y: self.y / rhs,
        }
    }
}

impl Vec2f {
    /// Componentwise floor, keeping the fractional representation.
    pub fn floor(self) -> Vec2f {
        Vec2 {
            x: self.x.floor(),
            y: self.y.floor(),
        }
    }

    /// Componentwise floor to integer indices. Floors before casting so that
    /// negative coordinates round down instead of towards zero.
    pub fn floor_to_i64(self) -> Vec2i {
        Vec2 {
            x: self.x.floor() as i64,
            y: self.y.floor() as i64,
        }
    }
}

#[cfg(test)]
mod tests {
    use testutils::assert_float_eq;

    use super::*;

    fn assert_vec2f_eq(v1: Vec2f, v2: Vec2f, epsilon: f64) {
        assert_float_eq(v1.x, v2.x, epsilon);
        assert_float_eq(v1.y, v2.y, epsilon);
    }

    #[test]
    fn test_vec2_sub() {
        assert_vec2f_eq(
            vec2f(14.0, 32.0) - vec2f(4.0, 40.0),
            vec2f(10.0, -8.0),
            1e-5,
        );
    }

    #[test]
    fn test_vec2_add() {
        assert_vec2f_eq(vec2f(5.0, 7.0) + vec2f(-2.0, 3.0), vec2f(3.0, 10.0), 1e-5);
    }

    #[test]
    fn test_vec2_mul() {
        assert_vec2f_eq(vec2f(5.0, 7.0) * 1.5, vec2f(7.5, 10.5), 1e-5);
    }

    #[test]
    fn test_vec2_div() {
        assert_vec2f_eq(vec2f(5.0, 7.0) / 2.0, vec2f(2.5, 3.5), 1e-5);
    }

    #[test]
    fn test_floor_to_i64_negative() {
        assert_eq!(vec2f(-0.25, 1.75).floor_to_i64(), vec2i(-1, 1));
    }
}
